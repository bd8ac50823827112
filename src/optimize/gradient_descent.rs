use super::vector::{is_normal, step};
use super::{
    Algorithm, ImprovementTracker, OptimizationResult, Problem, TerminationReason, ValueAndPoint,
};
use crate::error::Error;

/// Plain gradient descent: each iteration tries every configured step size
/// along `-∇f` and keeps the best finite candidate, or stays put if none
/// improves.
pub fn run(mut problem: Problem<'_, '_>, start: &[f64]) -> Result<OptimizationResult, Error> {
    const NAME: Algorithm = Algorithm::GradientDescent;
    let config = problem.config;
    let params = &config.gradient_descent;

    let mut current = ValueAndPoint::new(problem.value(start), start.to_vec());
    if !is_normal(current.value) {
        return Err(Error::Optimization(format!(
            "non-finite objective {} at the starting point",
            current.value
        )));
    }

    let mut tracker = ImprovementTracker::default();
    let mut termination = TerminationReason::MaxIterations;
    let mut iteration = 0;
    while iteration < params.max_steps {
        problem.begin_iteration(NAME, iteration, &current);

        let gradient = problem.checked_gradient(&current.point)?;
        if problem.should_stop(iteration, &current, &gradient) {
            termination = TerminationReason::EarlyStopping;
            break;
        }

        let mut best = current.clone();
        let mut has_valid_candidate = false;
        for &size in &params.step_sizes {
            let candidate = step(&current.point, &gradient, -size);
            let value = problem.value(&candidate);
            if is_normal(value) {
                has_valid_candidate = true;
                if value < best.value {
                    best = ValueAndPoint::new(value, candidate);
                }
            }
        }
        if !has_valid_candidate {
            return Err(Error::Optimization(format!(
                "no finite candidate around {}",
                problem.describe(&current.point)
            )));
        }

        if tracker.stalled(best.value, current.value, &config.stopping) {
            termination = TerminationReason::NoImprovement;
            break;
        }
        current = best;
        iteration += 1;
    }

    Ok(problem.finish(NAME, current, iteration, termination))
}
