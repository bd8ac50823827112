use log::trace;

use super::vector::{dot, is_normal, step};
use super::{Problem, ValueAndPoint};
use crate::config::LineSearchConfig;
use crate::error::Error;

/// Backtracking line search along `direction` from `current`.
///
/// Starts at `t = 1` and shrinks `t` by `beta` until
/// `f(x + t·d) <= f(x) + alpha·t·(∇f·d)` holds and the value is finite, or
/// `max_steps` shrinks have been spent. A finite value reached on the last
/// step is accepted even without sufficient decrease; a non-finite one is
/// [`Error::Backtracking`].
pub fn backtracking(
    problem: &mut Problem<'_, '_>,
    current: &ValueAndPoint,
    gradient: &[f64],
    direction: &[f64],
    config: &LineSearchConfig,
) -> Result<ValueAndPoint, Error> {
    problem.stats.line_searches += 1;
    let slope = dot(gradient, direction);

    let mut t = 1.0;
    let mut point = step(&current.point, direction, t);
    let mut value = problem.value(&point);
    let mut steps = 0;
    while value > current.value + config.alpha * t * slope || !is_normal(value) {
        if steps >= config.max_steps {
            break;
        }
        steps += 1;
        t *= config.beta;
        point = step(&current.point, direction, t);
        value = problem.value(&point);
        trace!("Line search step {steps}: t = {t}, f = {value}");
    }
    problem.stats.line_search_steps += steps;

    if !is_normal(value) {
        return Err(Error::Backtracking(steps));
    }
    Ok(ValueAndPoint::new(value, point))
}
