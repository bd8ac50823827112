use log::{debug, warn};

use super::line_search;
use super::vector::{dot, is_normal, norm, polak_ribiere, sum_vectors};
use super::{
    Algorithm, ImprovementTracker, OptimizationResult, Problem, TerminationReason, ValueAndPoint,
};
use crate::error::Error;

/// Nonlinear conjugate gradient with Polak-Ribière directions (clamped at
/// zero) and a backtracking line search.
pub fn run(mut problem: Problem<'_, '_>, start: &[f64]) -> Result<OptimizationResult, Error> {
    const NAME: Algorithm = Algorithm::ConjugateGradient;
    let config = problem.config;
    let params = &config.conjugate_gradient;

    let mut current = ValueAndPoint::new(problem.value(start), start.to_vec());
    if !is_normal(current.value) {
        return Err(Error::Optimization(format!(
            "non-finite objective {} at the starting point",
            current.value
        )));
    }
    let mut gradient = problem.checked_gradient(start)?;
    let mut direction: Vec<f64> = gradient.iter().map(|g| -g).collect();

    let mut tracker = ImprovementTracker::default();
    let mut termination = TerminationReason::MaxIterations;
    let mut iteration = 0;
    while iteration < params.max_steps {
        if problem.should_stop(iteration, &current, &gradient) {
            termination = TerminationReason::EarlyStopping;
            break;
        }
        problem.begin_iteration(NAME, iteration, &current);

        if dot(&gradient, &direction) >= 0.0 {
            debug!("{NAME}: Not a descent direction, restarting along the gradient");
            direction = gradient.iter().map(|g| -g).collect();
        }

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

        let next_gradient = problem.checked_gradient(&next.point)?;
        let omega = polak_ribiere(&next_gradient, &gradient).max(0.0);
        direction = sum_vectors(&direction, &next_gradient, omega, -1.0);

        if tracker.stalled(next.value, current.value, &config.stopping) {
            termination = TerminationReason::NoImprovement;
            break;
        }
        current = next;
        gradient = next_gradient;
        iteration += 1;

        if norm(&direction) < params.grad_eps && iteration > params.min_steps {
            termination = TerminationReason::GradientNorm;
            break;
        }
    }

    Ok(problem.finish(NAME, current, iteration, termination))
}
