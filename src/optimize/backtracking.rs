use log::warn;

use super::line_search;
use super::vector::{is_normal, norm};
use super::{
    Algorithm, ImprovementTracker, OptimizationResult, Problem, TerminationReason, ValueAndPoint,
};
use crate::error::Error;

/// Gradient descent with a backtracking line search along `-∇f`.
pub fn run(mut problem: Problem<'_, '_>, start: &[f64]) -> Result<OptimizationResult, Error> {
    const NAME: Algorithm = Algorithm::GradientDescentBacktracking;
    let config = problem.config;
    let params = &config.backtracking;

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
        if norm(&gradient) < params.grad_eps && iteration >= params.min_steps {
            termination = TerminationReason::GradientNorm;
            break;
        }

        let direction: Vec<f64> = gradient.iter().map(|g| -g).collect();
        let next = match line_search::backtracking(
            &mut problem,
            &current,
            &gradient,
            &direction,
            &config.line_search,
        ) {
            Ok(next) => next,
            Err(Error::Backtracking(steps)) => {
                warn!("{NAME}: No backtracking step possible after {steps} steps, terminating");
                termination = TerminationReason::LineSearchFailed;
                break;
            }
            Err(err) => return Err(err),
        };

        if tracker.stalled(next.value, current.value, &config.stopping) {
            termination = TerminationReason::NoImprovement;
            break;
        }
        current = next;
        iteration += 1;
    }

    Ok(problem.finish(NAME, current, iteration, termination))
}
