//! Symbolic differentiation with zero/one elimination.
//!
//! Derivatives are ordinary nodes appended to the same store, memoized per
//! `(variable, node)`. The simplifying constructors below fold constants so
//! that the common `0` and `1` partials never grow the graph.

use log::trace;

use super::{Frame, Graph, MathFunction, Node, NodeIndex, Operation, Store};
use crate::error::Error;

/// Step used by [`approximate_derivative`].
pub const FINITE_DIFFERENCE_EPS: f64 = 1e-4;

impl Graph {
    /// Derivative of `root` with respect to input `variable`.
    pub fn differentiate(&self, root: NodeIndex, variable: usize) -> Result<NodeIndex, Error> {
        assert!(
            variable < self.dim,
            "variable {variable} out of range 0..{}",
            self.dim
        );
        self.store_mut().differentiate(root, variable)
    }

    /// One derivative node per input variable.
    pub fn gradient(&self, root: NodeIndex) -> Result<Vec<NodeIndex>, Error> {
        let before = self.len();
        let gradient = (0..self.dim)
            .map(|variable| self.differentiate(root, variable))
            .collect::<Result<Vec<_>, _>>()?;
        trace!(
            "Gradient of {root} over {} variables added {} nodes",
            self.dim,
            self.len() - before
        );
        Ok(gradient)
    }
}

impl Store {
    fn memoized(&self, variable: usize, node: NodeIndex) -> Option<NodeIndex> {
        self.memo
            .get(variable)
            .and_then(|row| row.get(node.index()).copied().flatten())
    }

    fn memoize(&mut self, variable: usize, node: NodeIndex, derivative: NodeIndex) {
        if self.memo.len() <= variable {
            self.memo.resize_with(variable + 1, Vec::new);
        }
        let row = &mut self.memo[variable];
        if row.len() <= node.index() {
            row.resize(node.index() + 1, None);
        }
        debug_assert!(row[node.index()].is_none(), "memo entry overwritten");
        row[node.index()] = Some(derivative);
    }

    fn derivative_of(&self, variable: usize, node: NodeIndex) -> NodeIndex {
        match self.memoized(variable, node) {
            Some(derivative) => derivative,
            None => unreachable!("child {node} combined before being differentiated"),
        }
    }

    pub(crate) fn differentiate(&mut self, root: NodeIndex, variable: usize) -> Result<NodeIndex, Error> {
        if let Some(derivative) = self.memoized(variable, root) {
            return Ok(derivative);
        }

        let mut stack = vec![Frame::Enter(root)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(index) => {
                    if self.memoized(variable, index).is_some() {
                        continue;
                    }
                    match self.node(index) {
                        Node::Variable(slot) => {
                            let one_or_zero = if slot as usize == variable { 1.0 } else { 0.0 };
                            let derivative = self.constant(one_or_zero);
                            self.memoize(variable, index, derivative);
                        }
                        Node::Constant(_) => {
                            let zero = self.constant(0.0);
                            self.memoize(variable, index, zero);
                        }
                        Node::Operation { lhs, rhs, .. } => {
                            stack.push(Frame::Combine(index));
                            if self.memoized(variable, rhs).is_none() {
                                stack.push(Frame::Enter(rhs));
                            }
                            if self.memoized(variable, lhs).is_none() {
                                stack.push(Frame::Enter(lhs));
                            }
                        }
                        Node::Function { arg, .. } => {
                            stack.push(Frame::Combine(index));
                            if self.memoized(variable, arg).is_none() {
                                stack.push(Frame::Enter(arg));
                            }
                        }
                    }
                }
                Frame::Combine(index) => {
                    let derivative = match self.node(index) {
                        Node::Operation { op, lhs, rhs } => {
                            let da = self.derivative_of(variable, lhs);
                            let db = self.derivative_of(variable, rhs);
                            match op {
                                Operation::Add => self.add(da, db),
                                Operation::Sub => self.sub(da, db),
                                Operation::Mul => self.d_mul(lhs, rhs, da, db),
                                Operation::Div => self.d_div(lhs, rhs, da, db),
                            }
                        }
                        Node::Function { function, arg } => {
                            let dx = self.derivative_of(variable, arg);
                            self.d_function(function, arg, index, dx)?
                        }
                        Node::Variable(_) | Node::Constant(_) => continue,
                    };
                    self.memoize(variable, index, derivative);
                }
            }
        }
        Ok(self.derivative_of(variable, root))
    }

    fn constants_of(&self, a: NodeIndex, b: NodeIndex) -> Option<(f64, f64)> {
        Some((self.node(a).constant()?, self.node(b).constant()?))
    }

    pub(crate) fn add(&mut self, a: NodeIndex, b: NodeIndex) -> NodeIndex {
        if let Some((x, y)) = self.constants_of(a, b) {
            return self.constant(x + y);
        }
        if self.is_constant(b, 0.0) {
            return a;
        }
        if self.is_constant(a, 0.0) {
            return b;
        }
        self.operation(Operation::Add, a, b)
    }

    pub(crate) fn sub(&mut self, a: NodeIndex, b: NodeIndex) -> NodeIndex {
        if let Some((x, y)) = self.constants_of(a, b) {
            return self.constant(x - y);
        }
        if self.is_constant(b, 0.0) {
            return a;
        }
        self.operation(Operation::Sub, a, b)
    }

    pub(crate) fn mul(&mut self, a: NodeIndex, b: NodeIndex) -> NodeIndex {
        if self.is_constant(a, 0.0) || self.is_constant(b, 0.0) {
            return self.constant(0.0);
        }
        if let Some((x, y)) = self.constants_of(a, b) {
            return self.constant(x * y);
        }
        if self.is_constant(b, 1.0) {
            return a;
        }
        if self.is_constant(a, 1.0) {
            return b;
        }
        self.operation(Operation::Mul, a, b)
    }

    pub(crate) fn div(&mut self, a: NodeIndex, b: NodeIndex) -> NodeIndex {
        if self.is_constant(a, 0.0) {
            return self.constant(0.0);
        }
        if let Some((x, y)) = self.constants_of(a, b) {
            return self.constant(x / y);
        }
        if self.is_constant(b, 1.0) {
            return a;
        }
        self.operation(Operation::Div, a, b)
    }

    fn negate(&mut self, a: NodeIndex) -> NodeIndex {
        let zero = self.constant(0.0);
        self.sub(zero, a)
    }

    fn apply(&mut self, function: MathFunction, x: NodeIndex) -> NodeIndex {
        match self.node(x).constant() {
            Some(value) => self.constant(function.apply(value)),
            None => self.function(function, x),
        }
    }

    fn d_mul(&mut self, a: NodeIndex, b: NodeIndex, da: NodeIndex, db: NodeIndex) -> NodeIndex {
        let a_db = self.mul(a, db);
        let da_b = self.mul(da, b);
        self.add(a_db, da_b)
    }

    fn d_div(&mut self, a: NodeIndex, b: NodeIndex, da: NodeIndex, db: NodeIndex) -> NodeIndex {
        let b_da = self.mul(b, da);
        let a_db = self.mul(a, db);
        let numerator = self.sub(b_da, a_db);
        let denominator = self.apply(MathFunction::Sqr, b);
        self.div(numerator, denominator)
    }

    /// `d f(x)` where `original` is the node `f(x)` itself.
    fn d_function(
        &mut self,
        function: MathFunction,
        x: NodeIndex,
        original: NodeIndex,
        dx: NodeIndex,
    ) -> Result<NodeIndex, Error> {
        if function == MathFunction::UnitStep {
            return Err(Error::NonDifferentiable(function));
        }
        if self.is_constant(dx, 0.0) {
            return Ok(self.constant(0.0));
        }
        let derivative = match function {
            MathFunction::Sqr => {
                let two = self.constant(2.0);
                let x_dx = self.mul(x, dx);
                self.mul(two, x_dx)
            }
            MathFunction::Sqrt => {
                let twice = self.add(original, original);
                self.div(dx, twice)
            }
            MathFunction::Exp => self.mul(original, dx),
            MathFunction::Log => self.div(dx, x),
            MathFunction::Sin => {
                let cos = self.apply(MathFunction::Cos, x);
                self.mul(dx, cos)
            }
            MathFunction::Cos => {
                let sin = self.apply(MathFunction::Sin, x);
                let dx_sin = self.mul(dx, sin);
                self.negate(dx_sin)
            }
            MathFunction::Tan => {
                let cos = self.apply(MathFunction::Cos, x);
                let cos_squared = self.apply(MathFunction::Sqr, cos);
                self.div(dx, cos_squared)
            }
            MathFunction::Asin | MathFunction::Acos => {
                let one = self.constant(1.0);
                let x_squared = self.apply(MathFunction::Sqr, x);
                let radicand = self.sub(one, x_squared);
                let root = self.apply(MathFunction::Sqrt, radicand);
                let derivative = self.div(dx, root);
                if function == MathFunction::Acos {
                    self.negate(derivative)
                } else {
                    derivative
                }
            }
            MathFunction::Atan => {
                let one = self.constant(1.0);
                let x_squared = self.apply(MathFunction::Sqr, x);
                let denominator = self.add(x_squared, one);
                self.div(dx, denominator)
            }
            // One-sided at the kink: unit_step(0) = 1.
            MathFunction::Ramp => {
                let step = self.apply(MathFunction::UnitStep, x);
                self.mul(step, dx)
            }
            MathFunction::UnitStep => return Err(Error::NonDifferentiable(function)),
        };
        Ok(derivative)
    }
}

/// Central finite difference of `f` along coordinate `i` at `x`.
pub fn approximate_derivative(f: impl Fn(&[f64]) -> f64, x: &[f64], i: usize) -> f64 {
    let mut probe = x.to_vec();
    probe[i] = x[i] + FINITE_DIFFERENCE_EPS;
    let above = f(&probe);
    probe[i] = x[i] - FINITE_DIFFERENCE_EPS;
    let below = f(&probe);
    (above - below) / (2.0 * FINITE_DIFFERENCE_EPS)
}

/// [`approximate_derivative`] for every coordinate.
pub fn approximate_gradient(f: impl Fn(&[f64]) -> f64, x: &[f64]) -> Vec<f64> {
    (0..x.len())
        .map(|i| approximate_derivative(&f, x, i))
        .collect()
}
