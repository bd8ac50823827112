//! Expression handles.
//!
//! Arithmetic on [`Term`]s records nodes; nothing is evaluated. Mixing a
//! `Term` with an `f64` records the `f64` as a deduplicated constant.

use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use super::{Graph, MathFunction, NodeIndex, Operation, Reuse};
use crate::error::Error;

/// A node of a [`Graph`], borrowed for the graph's lifetime.
#[derive(Clone, Copy)]
pub struct Term<'g> {
    graph: &'g Graph,
    index: NodeIndex,
}

impl<'g> Term<'g> {
    /// Wraps an existing node. `index` must belong to `graph`.
    pub fn new(graph: &'g Graph, index: NodeIndex) -> Self {
        Term { graph, index }
    }

    /// The node this term records, for building a
    /// [`Function`](crate::Function) or [`Gradient`](crate::Gradient).
    pub fn index(self) -> NodeIndex {
        self.index
    }

    pub fn graph(self) -> &'g Graph {
        self.graph
    }

    /// A constant recorded in the same graph.
    pub fn constant(self, value: f64) -> Self {
        Term::new(self.graph, self.graph.constant(value))
    }

    /// Evaluates this expression at `x`, ignoring cached values.
    pub fn eval(self, x: &[f64]) -> f64 {
        self.graph.eval(self.index, x, Reuse::Invalidate)
    }

    /// Partial derivative by input `variable`, recorded in the same graph.
    ///
    /// Repeated calls return the memoized node. Fails with
    /// [`Error::NonDifferentiable`] if `unit_step` is reachable.
    pub fn differentiate(self, variable: usize) -> Result<Self, Error> {
        let index = self.graph.differentiate(self.index, variable)?;
        Ok(Term::new(self.graph, index))
    }

    fn operation(self, op: Operation, rhs: Term<'g>) -> Self {
        assert!(
            std::ptr::eq(self.graph, rhs.graph),
            "cannot combine terms from different graphs"
        );
        Term::new(self.graph, self.graph.operation(op, self.index, rhs.index))
    }

    fn function(self, function: MathFunction) -> Self {
        Term::new(self.graph, self.graph.function(function, self.index))
    }

    pub fn sqr(self) -> Self {
        self.function(MathFunction::Sqr)
    }

    pub fn sqrt(self) -> Self {
        self.function(MathFunction::Sqrt)
    }

    pub fn exp(self) -> Self {
        self.function(MathFunction::Exp)
    }

    /// Natural logarithm.
    pub fn log(self) -> Self {
        self.function(MathFunction::Log)
    }

    pub fn sin(self) -> Self {
        self.function(MathFunction::Sin)
    }

    pub fn cos(self) -> Self {
        self.function(MathFunction::Cos)
    }

    pub fn tan(self) -> Self {
        self.function(MathFunction::Tan)
    }

    pub fn asin(self) -> Self {
        self.function(MathFunction::Asin)
    }

    pub fn acos(self) -> Self {
        self.function(MathFunction::Acos)
    }

    pub fn atan(self) -> Self {
        self.function(MathFunction::Atan)
    }

    pub fn unit_step(self) -> Self {
        self.function(MathFunction::UnitStep)
    }

    pub fn ramp(self) -> Self {
        self.function(MathFunction::Ramp)
    }
}

impl fmt::Debug for Term<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Term").field(&self.index).finish()
    }
}

impl fmt::Display for Term<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.graph.render(self.index))
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident, $op:expr) => {
        impl<'g> $trait for Term<'g> {
            type Output = Term<'g>;
            fn $method(self, rhs: Term<'g>) -> Term<'g> {
                self.operation($op, rhs)
            }
        }

        impl<'g> $trait<f64> for Term<'g> {
            type Output = Term<'g>;
            fn $method(self, rhs: f64) -> Term<'g> {
                self.operation($op, self.constant(rhs))
            }
        }

        impl<'g> $trait<Term<'g>> for f64 {
            type Output = Term<'g>;
            fn $method(self, rhs: Term<'g>) -> Term<'g> {
                rhs.constant(self).operation($op, rhs)
            }
        }

        impl<'g> $assign_trait for Term<'g> {
            fn $assign_method(&mut self, rhs: Term<'g>) {
                *self = self.operation($op, rhs);
            }
        }

        impl<'g> $assign_trait<f64> for Term<'g> {
            fn $assign_method(&mut self, rhs: f64) {
                *self = self.operation($op, self.constant(rhs));
            }
        }
    };
}

impl_binary_operator!(Add, add, AddAssign, add_assign, Operation::Add);
impl_binary_operator!(Sub, sub, SubAssign, sub_assign, Operation::Sub);
impl_binary_operator!(Mul, mul, MulAssign, mul_assign, Operation::Mul);
impl_binary_operator!(Div, div, DivAssign, div_assign, Operation::Div);

impl<'g> Neg for Term<'g> {
    type Output = Term<'g>;
    fn neg(self) -> Term<'g> {
        self.constant(0.0) - self
    }
}
