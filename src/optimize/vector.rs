//! Dense vector helpers for the optimizers.

/// Values this close to zero are flushed to zero by [`sum_vectors`].
const FLUSH_TO_ZERO: f64 = 1e-100;

/// Finite, i.e. neither NaN nor infinite.
#[inline]
pub fn is_normal(x: f64) -> bool {
    x.is_finite()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Squared L2 norm.
pub fn norm_squared(v: &[f64]) -> f64 {
    dot(v, v)
}

pub fn norm(v: &[f64]) -> f64 {
    norm_squared(v).sqrt()
}

/// `ka * a + kb * b`, with tiny components flushed to zero so repeated
/// steps do not wander into subnormals.
pub fn sum_vectors(a: &[f64], b: &[f64], ka: f64, kb: f64) -> Vec<f64> {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let v = ka * x + kb * y;
            if v.abs() < FLUSH_TO_ZERO {
                0.0
            } else {
                v
            }
        })
        .collect()
}

/// `point + t * direction`.
pub fn step(point: &[f64], direction: &[f64], t: f64) -> Vec<f64> {
    sum_vectors(point, direction, 1.0, t)
}

/// Polak-Ribière coefficient `(g·g - g·g_prev) / (g_prev·g_prev)`, or `0`
/// when that is not finite. Not clamped; callers take `max(0, ·)`.
pub fn polak_ribiere(gradient: &[f64], previous: &[f64]) -> f64 {
    let beta = (norm_squared(gradient) - dot(gradient, previous)) / norm_squared(previous);
    if is_normal(beta) {
        beta
    } else {
        0.0
    }
}
