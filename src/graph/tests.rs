// src/graph/tests.rs

use super::*;
use crate::error::Error;
use approx::assert_relative_eq;
use test_log::test;

fn graph(dim: usize) -> Graph {
    Graph::new(dim)
}

#[test]
fn variables_occupy_the_first_slots() {
    let g = graph(3);
    assert_eq!(g.len(), 3);
    for slot in 0..3 {
        assert_eq!(g.node(g.variable(slot)), Node::Variable(slot as u32));
    }
}

#[test]
fn constants_are_deduplicated_by_value() {
    let g = graph(1);
    let a = g.constant(2.5);
    let b = g.constant(2.5);
    let c = g.constant(3.5);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(g.constant_count(), 2);
}

#[test]
fn signed_zeros_are_distinct_constants() {
    let g = graph(1);
    let positive = g.constant(0.0);
    let negative = g.constant(-0.0);
    assert_ne!(positive, negative);
    assert!(g.node(negative).constant().unwrap().is_sign_negative());
    assert!(g.node(positive).constant().unwrap().is_sign_positive());
}

#[test]
fn identical_nan_payloads_share_a_node() {
    let g = graph(1);
    let a = g.constant(f64::NAN);
    let b = g.constant(f64::NAN);
    assert_eq!(a, b);
    assert!(g.eval(a, &[0.0], Reuse::Invalidate).is_nan());

    let other_payload = f64::from_bits(f64::NAN.to_bits() | 1);
    assert!(other_payload.is_nan());
    assert_ne!(g.constant(other_payload), a);
}

#[test]
fn evaluates_operations() {
    let g = graph(2);
    let (x, y) = (g.variable(0), g.variable(1));
    let cases = [
        (Operation::Add, 1.5 + -4.25),
        (Operation::Sub, 1.5 - -4.25),
        (Operation::Mul, 1.5 * -4.25),
        (Operation::Div, 1.5 / -4.25),
    ];
    for (op, expected) in cases {
        let node = g.operation(op, x, y);
        assert_eq!(g.eval(node, &[1.5, -4.25], Reuse::Invalidate), expected);
    }
}

#[test]
fn evaluates_every_function() {
    let g = graph(1);
    let x = g.variable(0);
    for &input in &[-0.75, -0.1, 0.0, 0.3, 0.9] {
        for function in MathFunction::ALL {
            let node = g.function(function, x);
            let value = g.eval(node, &[input], Reuse::Invalidate);
            let expected = function.apply(input);
            if expected.is_nan() {
                assert!(value.is_nan(), "{function}({input})");
            } else {
                assert_relative_eq!(value, expected, max_relative = 1e-15);
            }
        }
    }
}

#[test]
fn unit_step_and_ramp_at_the_edges() {
    assert_eq!(unit_step(0.0), 1.0);
    assert_eq!(unit_step(-0.0), 1.0);
    assert_eq!(unit_step(-1e-300), 0.0);
    assert_eq!(unit_step(f64::NAN), 0.0);
    assert_eq!(ramp(0.0), 0.0);
    assert_eq!(ramp(2.5), 2.5);
    assert_eq!(ramp(-2.5), 0.0);
    assert_eq!(ramp(f64::NAN), 0.0);
}

#[test]
fn cached_values_are_reused_until_invalidated() {
    let g = graph(1);
    let x = g.variable(0);
    let sq = g.function(MathFunction::Sqr, x);
    assert_eq!(g.eval(sq, &[3.0], Reuse::Invalidate), 9.0);
    // Stale cache is visible on purpose with Keep.
    assert_eq!(g.eval(sq, &[4.0], Reuse::Keep), 9.0);
    assert_eq!(g.eval(sq, &[4.0], Reuse::Invalidate), 16.0);
}

#[test]
fn derivative_of_variables_and_constants() {
    let g = graph(2);
    let dx = g.differentiate(g.variable(0), 0).unwrap();
    let dy = g.differentiate(g.variable(1), 0).unwrap();
    let dc = g.differentiate(g.constant(7.0), 1).unwrap();
    assert_eq!(g.node(dx), Node::Constant(1.0));
    assert_eq!(g.node(dy), Node::Constant(0.0));
    assert_eq!(g.node(dc), Node::Constant(0.0));
}

#[test]
fn simplification_folds_linear_terms() {
    let g = graph(2);
    let x = g.variable(0);
    let three = g.constant(3.0);
    let scaled = g.operation(Operation::Mul, x, three);
    let shifted = g.operation(Operation::Add, scaled, g.variable(1));
    let d = g.differentiate(shifted, 0).unwrap();
    assert_eq!(g.node(d), Node::Constant(3.0));
    let d = g.differentiate(shifted, 1).unwrap();
    assert_eq!(g.node(d), Node::Constant(1.0));
}

#[test]
fn differentiation_is_memoized() {
    let g = graph(1);
    let x = g.variable(0);
    let s = g.function(MathFunction::Sin, x);
    let first = g.differentiate(s, 0).unwrap();
    let len = g.len();
    let second = g.differentiate(s, 0).unwrap();
    assert_eq!(first, second);
    assert_eq!(g.len(), len);
}

#[test]
fn unit_step_is_not_differentiable() {
    let g = graph(1);
    let step = g.function(MathFunction::UnitStep, g.variable(0));
    match g.differentiate(step, 0) {
        Err(Error::NonDifferentiable(MathFunction::UnitStep)) => {}
        other => panic!("expected NonDifferentiable, got {other:?}"),
    }
}

#[test]
fn ramp_derivative_is_one_sided_at_the_kink() {
    let g = graph(1);
    let r = g.function(MathFunction::Ramp, g.variable(0));
    let d = g.differentiate(r, 0).unwrap();
    assert_eq!(g.eval(d, &[0.0], Reuse::Invalidate), 1.0);
    assert_eq!(g.eval(d, &[0.5], Reuse::Invalidate), 1.0);
    assert_eq!(g.eval(d, &[-0.5], Reuse::Invalidate), 0.0);
}

#[test]
fn deep_sum_neither_overflows_evaluation_nor_differentiation() {
    let g = graph(2);
    let x = g.variable(0);
    let y = g.variable(1);
    let mut sum = x;
    for _ in 0..100_000 {
        sum = g.operation(Operation::Add, sum, y);
    }
    assert_eq!(g.eval(sum, &[1.0, 2.0], Reuse::Invalidate), 200_001.0);
    let dy = g.differentiate(sum, 1).unwrap();
    assert_eq!(g.node(dy), Node::Constant(100_000.0));
    let dx = g.differentiate(sum, 0).unwrap();
    assert_eq!(g.node(dx), Node::Constant(1.0));
}

#[test]
fn deep_product_chain_differentiates_without_recursion() {
    let g = graph(1);
    let x = g.variable(0);
    let half = g.constant(0.5);
    let mut chain = x;
    for _ in 0..50_000 {
        let scaled = g.operation(Operation::Mul, chain, half);
        chain = g.operation(Operation::Add, scaled, x);
    }
    let d = g.differentiate(chain, 0).unwrap();
    // chain = x * sum(0.5^k), k = 0..=50_000 -> derivative 2.
    assert_relative_eq!(g.eval(d, &[3.0], Reuse::Invalidate), 2.0, max_relative = 1e-12);
}

#[test]
fn finite_differences_match_a_quadratic() {
    let f = |x: &[f64]| x[0] * x[0] + 3.0 * x[1];
    let gradient = approximate_gradient(f, &[2.0, -1.0]);
    assert_relative_eq!(gradient[0], 4.0, max_relative = 1e-8);
    assert_relative_eq!(gradient[1], 3.0, max_relative = 1e-8);
}

#[test]
fn renders_infix() {
    let g = graph(1);
    let x = g.variable(0);
    let one = g.constant(1.0);
    let sum = g.operation(Operation::Add, x, one);
    let node = g.function(MathFunction::Sqr, sum);
    assert_eq!(g.render(node), "sqr((x[0] + 1))");
}
