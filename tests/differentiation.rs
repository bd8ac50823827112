//! Symbolic derivatives checked against central finite differences, and
//! recorded expressions checked against direct `f64` evaluation.

use approx::assert_relative_eq;
use gradjit::graph::{approximate_derivative, FINITE_DIFFERENCE_EPS};
use gradjit::{Context, Error, MathFunction, Objective, Scalar};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use test_log::test;

const POINTS: usize = 100;

struct Rational;
impl Objective for Rational {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        x[0] * x[1] + x[0] / (x[1] + 3.0) - x[1] * x[1] * x[0]
    }
}

struct Trigonometric;
impl Objective for Trigonometric {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        x[0].sin() * x[1].cos() + (x[0] * 0.5).tan() - (x[1] * x[0]).cos()
    }
}

struct Transcendental;
impl Objective for Transcendental {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        x[0].exp() * (x[1] + 2.0).log() + (x[0].sqr() + 1.0).sqrt() / x[1].exp()
    }
}

struct InverseTrigonometric;
impl Objective for InverseTrigonometric {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        (x[0] * 0.9).asin() + (x[1] * 0.9).acos() * 2.0 + (x[0] * x[1] * 3.0).atan()
    }
}

struct Ramped;
impl Objective for Ramped {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        x[0].ramp() * x[1] + x[1].sqr() - (x[0] * 2.0).ramp()
    }
}

/// Sum of many similar terms sharing sub-expressions.
struct ManyTerms;

impl ManyTerms {
    const TERMS: usize = 20;
}

impl Objective for ManyTerms {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        let shared = (x[0] - x[1]).sqr();
        let mut sum = shared.constant_like(0.0);
        for k in 1..=Self::TERMS {
            sum = sum + (shared * (k as f64) + x[2]).sin() / (k as f64);
        }
        sum
    }
}

fn random_points(seed: u64, dim: usize, lo: f64, hi: f64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..POINTS)
        .map(|_| (0..dim).map(|_| rng.gen_range(lo..hi)).collect())
        .collect()
}

/// Checks every partial at random points in `[lo, hi)^dim`.
///
/// A central difference is off by at most `eps^2 / 6 * |f'''|`, so the
/// tolerance grows with `third_derivative_bound`, a bound on the third
/// partials over the sampled box.
fn assert_matches_finite_differences<O: Objective>(
    objective: &O,
    dim: usize,
    lo: f64,
    hi: f64,
    third_derivative_bound: f64,
) {
    let truncation = third_derivative_bound * FINITE_DIFFERENCE_EPS.powi(2) / 6.0;
    let context = Context::new(dim).unwrap();
    let root = objective.evaluate(&context.x());
    let partials: Vec<_> = (0..dim).map(|i| root.differentiate(i).unwrap()).collect();

    for x in random_points(0x5eed, dim, lo, hi) {
        for (i, partial) in partials.iter().enumerate() {
            let analytic = partial.eval(&x);
            let numeric = approximate_derivative(|p| objective.evaluate(p), &x, i);
            assert!(
                (analytic - numeric).abs() <= truncation + 1e-6 * (1.0 + analytic.abs()),
                "d/dx{i} at {x:?}: analytic {analytic}, numeric {numeric}"
            );
        }
    }
}

fn assert_matches_direct_evaluation<O: Objective>(objective: &O, dim: usize, lo: f64, hi: f64) {
    let context = Context::new(dim).unwrap();
    let root = objective.evaluate(&context.x());
    for x in random_points(0xface, dim, lo, hi) {
        assert_relative_eq!(root.eval(&x), objective.evaluate(&x), max_relative = 1e-15);
    }
}

#[test]
fn rational_expressions() {
    assert_matches_direct_evaluation(&Rational, 2, -1.0, 1.0);
    assert_matches_finite_differences(&Rational, 2, -1.0, 1.0, 10.0);
}

#[test]
fn trigonometric_expressions() {
    assert_matches_direct_evaluation(&Trigonometric, 2, -1.0, 1.0);
    assert_matches_finite_differences(&Trigonometric, 2, -1.0, 1.0, 10.0);
}

#[test]
fn transcendental_expressions() {
    assert_matches_direct_evaluation(&Transcendental, 2, -1.0, 1.0);
    assert_matches_finite_differences(&Transcendental, 2, -1.0, 1.0, 50.0);
}

#[test]
fn inverse_trigonometric_expressions() {
    assert_matches_direct_evaluation(&InverseTrigonometric, 2, -1.0, 1.0);
    assert_matches_finite_differences(&InverseTrigonometric, 2, -1.0, 1.0, 200.0);
}

#[test]
fn ramp_matches_its_subgradient_away_from_the_kink() {
    assert_matches_finite_differences(&Ramped, 2, 0.05, 1.0, 1.0);
    assert_matches_finite_differences(&Ramped, 2, -1.0, -0.05, 1.0);
}

#[test]
fn shared_subexpressions_differentiate_once() {
    // With |x0 - x1| <= 1 the k-th term's third partial is at most
    // 8k^2 + 12k.
    let bound: f64 = (1..=ManyTerms::TERMS)
        .map(|k| (8 * k * k + 12 * k) as f64)
        .sum();
    assert_matches_finite_differences(&ManyTerms, 3, -0.5, 0.5, bound);

    let context = Context::new(3).unwrap();
    let root = ManyTerms.evaluate(&context.x());
    let recorded = context.graph().len();
    root.differentiate(0).unwrap();
    let differentiated = context.graph().len();
    root.differentiate(0).unwrap();
    assert!(differentiated > recorded);
    assert_eq!(context.graph().len(), differentiated);
}

#[test]
fn unit_step_cannot_be_differentiated() {
    let context = Context::new(1).unwrap();
    let x = context.var(0);
    let f = x.sqr() + x.unit_step();
    match f.differentiate(0) {
        Err(Error::NonDifferentiable(MathFunction::UnitStep)) => {}
        other => panic!("expected NonDifferentiable, got {other:?}"),
    }
    // Terms that never touch unit_step still differentiate.
    assert_eq!(x.sqr().differentiate(0).unwrap().eval(&[3.0]), 6.0);
}

#[test]
fn hundred_thousand_additions() {
    let context = Context::new(2).unwrap();
    let x = context.var(0);
    let y = context.var(1);
    let mut sum = x * 0.0;
    for i in 0..100_000 {
        sum += if i % 2 == 0 { x } else { y };
    }
    assert_eq!(sum.eval(&[1.0, 3.0]), 200_000.0);

    let dx = sum.differentiate(0).unwrap();
    let dy = sum.differentiate(1).unwrap();
    assert_eq!(dx.eval(&[1.0, 3.0]), 50_000.0);
    assert_eq!(dy.eval(&[1.0, 3.0]), 50_000.0);
}

#[test]
fn renders_readable_infix() {
    let context = Context::new(2).unwrap();
    let x = context.x();
    let f = (x[0] + 1.0) * x[1].sin() - 2.0;
    assert_eq!(f.to_string(), "(((x[0] + 1) * sin(x[1])) - 2)");
}
