//! The [`Scalar`] trait for writing objectives once and running them both
//! numerically (`f64`) and symbolically ([`Term`]).
//!
//! ```
//! use gradjit::Scalar;
//!
//! fn bowl<S: Scalar>(x: &[S]) -> S {
//!     (x[0] + 1.0).sqr() + (x[1] + 2.0).sqr()
//! }
//! assert_eq!(bowl(&[0.0, 0.0]), 5.0);
//! ```

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::graph::{ramp, unit_step, Term};

/// Arithmetic closed over `Self` and `f64`, plus the supported functions.
pub trait Scalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
    /// A constant of the same kind as `self`. For a [`Term`] it is recorded
    /// in the same graph.
    fn constant_like(self, value: f64) -> Self;

    fn sqr(self) -> Self;
    fn sqrt(self) -> Self;
    fn exp(self) -> Self;
    /// Natural logarithm.
    fn log(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn asin(self) -> Self;
    fn acos(self) -> Self;
    fn atan(self) -> Self;
    fn unit_step(self) -> Self;
    fn ramp(self) -> Self;
}

impl Scalar for f64 {
    #[inline]
    fn constant_like(self, value: f64) -> Self {
        value
    }

    #[inline]
    fn sqr(self) -> Self {
        self * self
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn log(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn sin(self) -> Self {
        f64::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        f64::cos(self)
    }

    #[inline]
    fn tan(self) -> Self {
        f64::tan(self)
    }

    #[inline]
    fn asin(self) -> Self {
        f64::asin(self)
    }

    #[inline]
    fn acos(self) -> Self {
        f64::acos(self)
    }

    #[inline]
    fn atan(self) -> Self {
        f64::atan(self)
    }

    #[inline]
    fn unit_step(self) -> Self {
        unit_step(self)
    }

    #[inline]
    fn ramp(self) -> Self {
        ramp(self)
    }
}

impl Scalar for Term<'_> {
    fn constant_like(self, value: f64) -> Self {
        self.constant(value)
    }

    fn sqr(self) -> Self {
        Term::sqr(self)
    }

    fn sqrt(self) -> Self {
        Term::sqrt(self)
    }

    fn exp(self) -> Self {
        Term::exp(self)
    }

    fn log(self) -> Self {
        Term::log(self)
    }

    fn sin(self) -> Self {
        Term::sin(self)
    }

    fn cos(self) -> Self {
        Term::cos(self)
    }

    fn tan(self) -> Self {
        Term::tan(self)
    }

    fn asin(self) -> Self {
        Term::asin(self)
    }

    fn acos(self) -> Self {
        Term::acos(self)
    }

    fn atan(self) -> Self {
        Term::atan(self)
    }

    fn unit_step(self) -> Self {
        Term::unit_step(self)
    }

    fn ramp(self) -> Self {
        Term::ramp(self)
    }
}
