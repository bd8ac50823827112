// In src/main.rs

use anyhow::Context as _;
use log::{info, warn};

use gradjit::config::CONFIG;
use gradjit::{
    Algorithm, Backend, CompiledFunction, Context, Objective, ObjectiveValue, Optimizer, Scalar,
};

/// `(x + 1)^2 + (y + 2)^2`, minimized at `(-1, -2)`.
struct Bowl;

impl Objective for Bowl {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        (x[0] + 1.0).sqr() + (x[1] + 2.0).sqr()
    }

    fn report(&self, x: &[f64]) -> ObjectiveValue {
        ObjectiveValue::new(self.evaluate(x))
            .with("dx", x[0] + 1.0)
            .with("dy", x[1] + 2.0)
    }
}

/// Compiles the objective with every backend available here and checks
/// they agree with the interpreter.
fn compare_backends(point: &[f64]) -> anyhow::Result<()> {
    let context = Context::new(point.len())?;
    let root = Bowl.evaluate(&context.x());
    let expected = root.eval(point);
    info!("Objective {root} = {expected} at {point:?}");

    for backend in Backend::ALL {
        match CompiledFunction::try_compile(context.graph(), root.index(), backend, &CONFIG.jit) {
            Ok(compiled) => {
                let value = compiled.call(point);
                info!("{backend:>10}: {value} (heap {})", compiled.heap_size());
                if value != expected {
                    warn!("{backend} disagrees with the interpreter: {value} != {expected}");
                }
            }
            Err(err) => warn!("{backend:>10}: unavailable ({err})"),
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting gradjit demo...");
    let start = [0.0, 0.0];

    compare_backends(&start).context("Failed to compare backends")?;

    for algorithm in [
        Algorithm::GradientDescent,
        Algorithm::GradientDescentBacktracking,
        Algorithm::ConjugateGradient,
    ] {
        let result = Optimizer::new()
            .algorithm(algorithm)
            .track_progress(true)
            .point_formatter(|p| format!("({:.6}, {:.6})", p[0], p[1]))
            .optimize(&Bowl, &start)
            .with_context(|| format!("{algorithm} failed"))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize result")?
        );
    }
    Ok(())
}
