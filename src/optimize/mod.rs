//! Gradient-based optimization of [`Objective`]s.
//!
//! [`Optimizer::optimize`] records the objective into a fresh [`Context`],
//! differentiates it, compiles both with the configured backend (or
//! interprets them when JIT is disabled), and runs one of three algorithms
//! against the resulting [`Function`] / [`Gradient`] pair:
//!
//! - [`Algorithm::GradientDescent`]: fixed candidate steps along `-∇f`.
//! - [`Algorithm::GradientDescentBacktracking`]: Armijo line search along `-∇f`.
//! - [`Algorithm::ConjugateGradient`]: Polak-Ribière directions with the same
//!   line search. The default.
//!
//! [`Optimizer::optimize_numerically`] skips recording altogether: it calls
//! the objective on plain `f64`s and approximates the gradient with central
//! finite differences.
//!
//! Internally every algorithm minimizes; [`Direction::Maximize`] flips the
//! sign of values and gradients on the way in and back on the way out.

pub mod backtracking;
pub mod conjugate_gradient;
pub mod gradient_descent;
pub mod line_search;
pub mod vector;

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{JitConfig, OptimizerConfig, StoppingConfig, CONFIG};
use crate::error::Error;
use crate::function::{Function, Gradient};
use crate::graph::Context;
use crate::jit::Backend;
use crate::scalar::Scalar;

/// A scalar objective written once for both `f64` and symbolic inputs.
pub trait Objective {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S;

    /// The value plus any named auxiliary values, for progress tracking.
    fn report(&self, x: &[f64]) -> ObjectiveValue {
        ObjectiveValue::new(self.evaluate(x))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveValue {
    pub value: f64,
    pub auxiliary: BTreeMap<String, f64>,
}

impl ObjectiveValue {
    pub fn new(value: f64) -> Self {
        ObjectiveValue {
            value,
            auxiliary: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.auxiliary.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    GradientDescent,
    GradientDescentBacktracking,
    #[default]
    ConjugateGradient,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::GradientDescent => "GradientDescent",
            Algorithm::GradientDescentBacktracking => "GradientDescentBT",
            Algorithm::ConjugateGradient => "ConjugateGradient",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Minimize,
    Maximize,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Minimize => 1.0,
            Direction::Maximize => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueAndPoint {
    pub value: f64,
    pub point: Vec<f64>,
}

impl ValueAndPoint {
    pub fn new(value: f64, point: Vec<f64>) -> Self {
        ValueAndPoint { value, point }
    }
}

/// Returned by an early-stopping predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStop {
    Continue,
    Stop,
}

/// Called once per iteration with the iteration number, the current point
/// and the current gradient, both in the minimization frame.
pub type EarlyStoppingFn = dyn Fn(usize, &ValueAndPoint, &[f64]) -> EarlyStop;

/// Renders a point for log output.
pub type PointFormatter = dyn Fn(&[f64]) -> String;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxIterations,
    NoImprovement,
    GradientNorm,
    EarlyStopping,
    LineSearchFailed,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::MaxIterations => write!(f, "maximum iterations reached"),
            TerminationReason::NoImprovement => write!(f, "no improvement"),
            TerminationReason::GradientNorm => write!(f, "gradient norm below tolerance"),
            TerminationReason::EarlyStopping => write!(f, "external stopping criterion"),
            TerminationReason::LineSearchFailed => write!(f, "no backtracking step possible"),
        }
    }
}

/// Per-iteration record, kept when progress tracking is on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationProgress {
    pub iterations: usize,
    pub objective_values: Vec<f64>,
    /// One series per auxiliary name reported by the objective.
    pub additional_values: BTreeMap<String, Vec<f64>>,
}

impl OptimizationProgress {
    pub fn track(&mut self, value: ObjectiveValue) {
        self.iterations += 1;
        self.objective_values.push(value.value);
        for (name, v) in value.auxiliary {
            self.additional_values.entry(name).or_default().push(v);
        }
    }
}

/// Work counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub iterations: usize,
    pub function_calls: usize,
    pub gradient_calls: usize,
    pub line_searches: usize,
    pub line_search_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub value: f64,
    pub point: Vec<f64>,
    pub iterations: usize,
    pub termination: TerminationReason,
    pub stats: OptimizerStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<OptimizationProgress>,
}

/// `next` does not improve enough on `current` (minimization frame).
///
/// Relative improvement is only judged when both values are clearly on
/// the same side of zero.
pub fn no_improvement(next: f64, current: f64, stopping: &StoppingConfig) -> bool {
    if current - next < stopping.min_absolute_per_step_improvement {
        return true;
    }
    let relative = stopping.min_relative_per_step_improvement;
    if current > 1e-6 && next > 1e-6 {
        next > current * (1.0 - relative)
    } else if current < -1e-6 && next < -1e-6 {
        next > current * (1.0 + relative)
    } else {
        false
    }
}

/// Counts consecutive non-improving iterations.
#[derive(Debug, Default)]
pub(crate) struct ImprovementTracker {
    streak: usize,
}

impl ImprovementTracker {
    /// Records one step; `true` when the run should end.
    pub(crate) fn stalled(&mut self, next: f64, current: f64, stopping: &StoppingConfig) -> bool {
        if no_improvement(next, current, stopping) {
            self.streak += 1;
            self.streak >= stopping.no_improvement_steps_to_terminate
        } else {
            self.streak = 0;
            false
        }
    }
}

/// Everything an algorithm needs: sign-adjusted evaluation, counters,
/// progress tracking and the external stopping hook.
pub struct Problem<'a, 'g> {
    function: &'a Function<'g>,
    gradient: &'a Gradient<'g>,
    sign: f64,
    function_scratch: Vec<f64>,
    gradient_scratch: Vec<f64>,
    pub(crate) config: &'a OptimizerConfig,
    pub(crate) stats: OptimizerStats,
    progress: Option<OptimizationProgress>,
    reporter: &'a dyn Fn(&[f64]) -> ObjectiveValue,
    early_stopping: Option<&'a EarlyStoppingFn>,
    point_formatter: Option<&'a PointFormatter>,
}

impl<'a, 'g> Problem<'a, 'g> {
    pub fn new(
        function: &'a Function<'g>,
        gradient: &'a Gradient<'g>,
        config: &'a OptimizerConfig,
        reporter: &'a dyn Fn(&[f64]) -> ObjectiveValue,
    ) -> Self {
        Problem {
            function,
            gradient,
            sign: config.direction.sign(),
            function_scratch: function.scratch(),
            gradient_scratch: gradient.scratch(),
            config,
            stats: OptimizerStats::default(),
            progress: config.track_progress.then(OptimizationProgress::default),
            reporter,
            early_stopping: None,
            point_formatter: None,
        }
    }

    pub fn with_early_stopping(mut self, predicate: Option<&'a EarlyStoppingFn>) -> Self {
        self.early_stopping = predicate;
        self
    }

    pub fn with_point_formatter(mut self, formatter: Option<&'a PointFormatter>) -> Self {
        self.point_formatter = formatter;
        self
    }

    /// Objective value at `x`, to be minimized.
    pub fn value(&mut self, x: &[f64]) -> f64 {
        self.stats.function_calls += 1;
        self.sign * self.function.eval(x, &mut self.function_scratch)
    }

    /// Gradient at `x`, in the minimization frame.
    pub fn gradient(&mut self, x: &[f64]) -> Vec<f64> {
        self.stats.gradient_calls += 1;
        let mut out = vec![0.0; x.len()];
        self.gradient.eval(x, &mut self.gradient_scratch, &mut out);
        if self.sign < 0.0 {
            out.iter_mut().for_each(|g| *g = -*g);
        }
        out
    }

    /// Like [`gradient`](Self::gradient), failing on non-finite components.
    pub fn checked_gradient(&mut self, x: &[f64]) -> Result<Vec<f64>, Error> {
        let gradient = self.gradient(x);
        if gradient.iter().all(|g| vector::is_normal(*g)) {
            Ok(gradient)
        } else {
            Err(Error::Optimization(format!(
                "non-finite gradient at {}",
                self.describe(x)
            )))
        }
    }

    /// Start of an iteration: counters, debug log, progress record.
    pub fn begin_iteration(&mut self, name: Algorithm, iteration: usize, current: &ValueAndPoint) {
        self.stats.iterations += 1;
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "{name}: Iteration {}, OF to minimize = {} @ {}",
                iteration + 1,
                current.value,
                self.describe(&current.point)
            );
        }
        if let Some(progress) = self.progress.as_mut() {
            progress.track((self.reporter)(&current.point));
        }
    }

    pub fn should_stop(&self, iteration: usize, current: &ValueAndPoint, gradient: &[f64]) -> bool {
        self.early_stopping
            .is_some_and(|predicate| predicate(iteration, current, gradient) == EarlyStop::Stop)
    }

    pub fn describe(&self, point: &[f64]) -> String {
        match self.point_formatter {
            Some(formatter) => formatter(point),
            None => format!("{point:?}"),
        }
    }

    pub fn stopping(&self) -> &StoppingConfig {
        &self.config.stopping
    }

    /// Converts the final minimization-frame state into a result.
    pub fn finish(
        self,
        name: Algorithm,
        current: ValueAndPoint,
        iterations: usize,
        termination: TerminationReason,
    ) -> OptimizationResult {
        let value = self.sign * current.value;
        info!("{name}: Result = {}", self.describe(&current.point));
        info!("{name}: Objective function = {value} ({termination} after {iterations} iterations)");
        info!("{name}: {:?}", self.stats);
        OptimizationResult {
            value,
            point: current.point,
            iterations,
            termination,
            stats: self.stats,
            progress: self.progress,
        }
    }
}

/// Records, differentiates, compiles and optimizes objectives.
pub struct Optimizer {
    pub config: OptimizerConfig,
    pub jit: JitConfig,
    early_stopping: Option<Box<EarlyStoppingFn>>,
    point_formatter: Option<Box<PointFormatter>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::with_config(CONFIG.optimizer.clone(), CONFIG.jit.clone())
    }
}

impl Optimizer {
    /// An optimizer configured from the process-wide [`CONFIG`].
    pub fn new() -> Self {
        Optimizer::default()
    }

    pub fn with_config(config: OptimizerConfig, jit: JitConfig) -> Self {
        Optimizer {
            config,
            jit,
            early_stopping: None,
            point_formatter: None,
        }
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.config.algorithm = algorithm;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.config.direction = direction;
        self
    }

    pub fn backend(mut self, backend: Option<Backend>) -> Self {
        self.jit.backend = backend;
        self
    }

    /// Evaluates by walking the graph instead of compiling it.
    pub fn disable_jit(self) -> Self {
        self.backend(None)
    }

    pub fn track_progress(mut self, track: bool) -> Self {
        self.config.track_progress = track;
        self
    }

    pub fn early_stopping(
        mut self,
        predicate: impl Fn(usize, &ValueAndPoint, &[f64]) -> EarlyStop + 'static,
    ) -> Self {
        self.early_stopping = Some(Box::new(predicate));
        self
    }

    pub fn point_formatter(mut self, formatter: impl Fn(&[f64]) -> String + 'static) -> Self {
        self.point_formatter = Some(Box::new(formatter));
        self
    }

    /// Runs the configured algorithm from `start`.
    ///
    /// Fails with [`Error::ConcurrentEvaluationAttempt`] if the calling
    /// thread is already recording, [`Error::NonDifferentiable`] if the
    /// objective uses `unit_step`, and [`Error::Optimization`] on
    /// non-finite values. Compilation failures exit the process.
    pub fn optimize<O: Objective>(&self, objective: &O, start: &[f64]) -> Result<OptimizationResult, Error> {
        let algorithm = self.config.algorithm;
        let context = Context::new(start.len())?;
        let x = context.x();
        let root = objective.evaluate(&x).index();
        let graph = context.graph();
        info!("{algorithm}: The objective function is {} nodes", graph.len());

        let backend = self.jit.backend;
        match backend {
            Some(backend) => info!("{algorithm}: Compiling with {backend}"),
            None => info!("{algorithm}: JIT disabled, evaluating the graph directly"),
        }
        let function = Function::new(graph, root, backend, &self.jit);
        let gradient = Gradient::new(graph, root, backend, &self.jit)?;
        info!(
            "{algorithm}: The objective function with its gradient is {} nodes",
            graph.len()
        );

        self.run(objective, &function, &gradient, start)
    }

    /// Runs the configured algorithm from `start` without recording a graph.
    ///
    /// The objective is evaluated on `f64`s and its gradient approximated by
    /// central finite differences, so objectives using `unit_step` are
    /// accepted and this may be called while the thread is recording.
    /// Non-finite values fail with [`Error::Optimization`].
    pub fn optimize_numerically<O: Objective>(
        &self,
        objective: &O,
        start: &[f64],
    ) -> Result<OptimizationResult, Error> {
        let dim = start.len();
        info!("{}: Evaluating natively with approximate gradients", self.config.algorithm);
        let function = Function::native(dim, |x| objective.evaluate(x));
        let gradient = Gradient::approximate(dim, |x| objective.evaluate(x));
        self.run(objective, &function, &gradient, start)
    }

    fn run<O: Objective>(
        &self,
        objective: &O,
        function: &Function<'_>,
        gradient: &Gradient<'_>,
        start: &[f64],
    ) -> Result<OptimizationResult, Error> {
        let algorithm = self.config.algorithm;
        let reporter = |point: &[f64]| objective.report(point);
        let problem = Problem::new(function, gradient, &self.config, &reporter)
            .with_early_stopping(self.early_stopping.as_deref())
            .with_point_formatter(self.point_formatter.as_deref());
        info!("{algorithm}: Begin at {}", problem.describe(start));

        match algorithm {
            Algorithm::GradientDescent => gradient_descent::run(problem, start),
            Algorithm::GradientDescentBacktracking => backtracking::run(problem, start),
            Algorithm::ConjugateGradient => conjugate_gradient::run(problem, start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_improvement_thresholds() {
        let stopping = StoppingConfig {
            min_absolute_per_step_improvement: 1e-3,
            min_relative_per_step_improvement: 0.1,
            no_improvement_steps_to_terminate: 2,
        };
        // Absolute: too small a drop.
        assert!(no_improvement(0.9995, 1.0, &stopping));
        // Relative, positive values: 5% < 10%.
        assert!(no_improvement(0.95, 1.0, &stopping));
        assert!(!no_improvement(0.8, 1.0, &stopping));
        // Relative, negative values: -1.05 vs -1.0 is only 5% better.
        assert!(no_improvement(-1.05, -1.0, &stopping));
        assert!(!no_improvement(-1.2, -1.0, &stopping));
        // Straddling zero is judged on the absolute drop alone.
        assert!(!no_improvement(-0.5, 0.5, &stopping));
    }

    #[test]
    fn tracker_needs_consecutive_stalls() {
        let stopping = StoppingConfig::default();
        let mut tracker = ImprovementTracker::default();
        assert!(!tracker.stalled(1.0, 1.0, &stopping));
        assert!(!tracker.stalled(0.5, 1.0, &stopping));
        assert!(!tracker.stalled(0.5, 0.5, &stopping));
        assert!(tracker.stalled(0.5, 0.5, &stopping));
    }

    #[test]
    fn progress_collects_auxiliary_series() {
        let mut progress = OptimizationProgress::default();
        progress.track(ObjectiveValue::new(3.0).with("penalty", 1.0));
        progress.track(ObjectiveValue::new(2.0).with("penalty", 0.5));
        assert_eq!(progress.iterations, 2);
        assert_eq!(progress.objective_values, vec![3.0, 2.0]);
        assert_eq!(progress.additional_values["penalty"], vec![1.0, 0.5]);
    }
}
