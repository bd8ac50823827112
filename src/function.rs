//! Callable objective functions and gradients.
//!
//! [`Function`] and [`Gradient`] are closed over how they evaluate: a
//! [`Blueprint`] walking the graph, a compiled artifact from one of the
//! [`Backend`]s, or a plain Rust closure that never touches a graph. The
//! compiled variants own their code and can be detached from the graph with
//! `into_compiled`. Closure gradients use central finite differences.
//!
//! `eval` panics on a wrong input or output length; `try_eval` reports it as
//! [`Error::DimensionMismatch`].

use std::fmt;

use log::debug;

use crate::config::JitConfig;
use crate::error::{Error, JitError};
use crate::graph::{approximate_derivative, Graph, NodeIndex, Reuse};
use crate::jit::{fatal, Backend, Compiled};

/// Interpreted evaluation of one node.
#[derive(Debug, Clone, Copy)]
pub struct Blueprint<'g> {
    graph: &'g Graph,
    root: NodeIndex,
}

impl<'g> Blueprint<'g> {
    pub fn new(graph: &'g Graph, root: NodeIndex) -> Self {
        Blueprint { graph, root }
    }

    pub fn dim(&self) -> usize {
        self.graph.dim()
    }

    pub fn eval(&self, x: &[f64]) -> f64 {
        self.graph.eval(self.root, x, Reuse::Invalidate)
    }
}

/// Interpreted evaluation of an objective and its partial derivatives.
#[derive(Debug, Clone)]
pub struct BlueprintGradient<'g> {
    graph: &'g Graph,
    root: NodeIndex,
    partials: Vec<NodeIndex>,
}

impl<'g> BlueprintGradient<'g> {
    pub fn new(graph: &'g Graph, root: NodeIndex, partials: Vec<NodeIndex>) -> Self {
        BlueprintGradient { graph, root, partials }
    }

    pub fn dim(&self) -> usize {
        self.partials.len()
    }

    /// Fills `out` with the gradient at `x` and returns the objective value.
    pub fn eval(&self, x: &[f64], out: &mut [f64]) -> f64 {
        assert_gradient_slots(out, self.partials.len());
        let value = self.graph.eval(self.root, x, Reuse::Invalidate);
        for (slot, &partial) in out.iter_mut().zip(&self.partials) {
            *slot = self.graph.eval(partial, x, Reuse::Keep);
        }
        value
    }
}

/// A compiled objective.
#[derive(Debug)]
pub struct CompiledFunction {
    code: Compiled,
}

impl CompiledFunction {
    pub fn try_compile(
        graph: &Graph,
        root: NodeIndex,
        backend: Backend,
        config: &JitConfig,
    ) -> Result<Self, JitError> {
        Ok(CompiledFunction {
            code: Compiled::try_new(backend, graph, &[root], config)?,
        })
    }

    /// As [`try_compile`](Self::try_compile), exiting the process on failure.
    pub fn compile(graph: &Graph, root: NodeIndex, backend: Backend, config: &JitConfig) -> Self {
        Self::try_compile(graph, root, backend, config).unwrap_or_else(|err| fatal(err))
    }

    pub fn dim(&self) -> usize {
        self.code.dim()
    }

    pub fn heap_size(&self) -> usize {
        self.code.heap_size()
    }

    /// A zeroed buffer large enough for [`eval`](Self::eval).
    pub fn scratch(&self) -> Vec<f64> {
        vec![0.0; self.heap_size()]
    }

    pub fn eval(&self, x: &[f64], scratch: &mut [f64]) -> f64 {
        self.code.eval(x, scratch)
    }

    /// Evaluates with a freshly allocated scratch buffer.
    pub fn call(&self, x: &[f64]) -> f64 {
        let mut scratch = self.scratch();
        self.eval(x, &mut scratch)
    }
}

/// A compiled gradient: one artifact computes the objective and every
/// partial derivative into the heap.
#[derive(Debug)]
pub struct CompiledGradient {
    code: Compiled,
    /// Component `i` of the gradient is `heap[gradient_indexes[i]]`.
    gradient_indexes: Vec<usize>,
}

impl CompiledGradient {
    pub fn try_compile(
        graph: &Graph,
        root: NodeIndex,
        partials: &[NodeIndex],
        backend: Backend,
        config: &JitConfig,
    ) -> Result<Self, JitError> {
        let mut roots = Vec::with_capacity(partials.len() + 1);
        roots.push(root);
        roots.extend_from_slice(partials);
        Ok(CompiledGradient {
            code: Compiled::try_new(backend, graph, &roots, config)?,
            gradient_indexes: partials.iter().map(|p| p.index()).collect(),
        })
    }

    pub fn compile(
        graph: &Graph,
        root: NodeIndex,
        partials: &[NodeIndex],
        backend: Backend,
        config: &JitConfig,
    ) -> Self {
        Self::try_compile(graph, root, partials, backend, config).unwrap_or_else(|err| fatal(err))
    }

    pub fn dim(&self) -> usize {
        self.code.dim()
    }

    pub fn heap_size(&self) -> usize {
        self.code.heap_size()
    }

    pub fn gradient_indexes(&self) -> &[usize] {
        &self.gradient_indexes
    }

    pub fn scratch(&self) -> Vec<f64> {
        vec![0.0; self.heap_size()]
    }

    /// Fills `out` with the gradient at `x` and returns the objective value.
    pub fn eval(&self, x: &[f64], scratch: &mut [f64], out: &mut [f64]) -> f64 {
        assert_gradient_slots(out, self.gradient_indexes.len());
        let value = self.code.eval(x, scratch);
        for (slot, &index) in out.iter_mut().zip(&self.gradient_indexes) {
            *slot = scratch[index];
        }
        value
    }

    pub fn call(&self, x: &[f64]) -> Vec<f64> {
        let mut scratch = self.scratch();
        let mut out = vec![0.0; self.gradient_indexes.len()];
        self.eval(x, &mut scratch, &mut out);
        out
    }
}

fn assert_gradient_slots(out: &[f64], dim: usize) {
    assert_eq!(out.len(), dim, "expected {dim} gradient slots, got {}", out.len());
}

fn check_dim(expected: usize, actual: usize) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

type Closure<'g> = Box<dyn Fn(&[f64]) -> f64 + 'g>;

/// An objective given directly as a closure over `f64`s.
pub struct NativeFunction<'g> {
    dim: usize,
    f: Closure<'g>,
}

impl<'g> NativeFunction<'g> {
    pub fn new(dim: usize, f: impl Fn(&[f64]) -> f64 + 'g) -> Self {
        NativeFunction { dim, f: Box::new(f) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn eval(&self, x: &[f64]) -> f64 {
        assert_eq!(x.len(), self.dim, "expected {} inputs, got {}", self.dim, x.len());
        (self.f)(x)
    }
}

impl fmt::Debug for NativeFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction").field("dim", &self.dim).finish_non_exhaustive()
    }
}

/// Central finite-difference gradient of a closure.
///
/// Costs `2 * dim + 1` calls per evaluation and is only as accurate as
/// [`FINITE_DIFFERENCE_EPS`](crate::graph::FINITE_DIFFERENCE_EPS) allows.
pub struct ApproximateGradient<'g> {
    dim: usize,
    f: Closure<'g>,
}

impl<'g> ApproximateGradient<'g> {
    pub fn new(dim: usize, f: impl Fn(&[f64]) -> f64 + 'g) -> Self {
        ApproximateGradient { dim, f: Box::new(f) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Fills `out` with the gradient at `x` and returns the objective value.
    pub fn eval(&self, x: &[f64], out: &mut [f64]) -> f64 {
        assert_eq!(x.len(), self.dim, "expected {} inputs, got {}", self.dim, x.len());
        assert_gradient_slots(out, self.dim);
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = approximate_derivative(&self.f, x, i);
        }
        (self.f)(x)
    }
}

impl fmt::Debug for ApproximateGradient<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApproximateGradient").field("dim", &self.dim).finish_non_exhaustive()
    }
}

/// An objective, interpreted, compiled, or native.
#[derive(Debug)]
pub enum Function<'g> {
    Blueprint(Blueprint<'g>),
    Compiled(CompiledFunction),
    Native(NativeFunction<'g>),
}

impl<'g> Function<'g> {
    /// Interprets `root` when `backend` is `None`, compiles it otherwise.
    pub fn try_new(
        graph: &'g Graph,
        root: NodeIndex,
        backend: Option<Backend>,
        config: &JitConfig,
    ) -> Result<Self, JitError> {
        Ok(match backend {
            None => Function::Blueprint(Blueprint::new(graph, root)),
            Some(backend) => Function::Compiled(CompiledFunction::try_compile(graph, root, backend, config)?),
        })
    }

    /// As [`try_new`](Self::try_new), exiting the process on failure.
    pub fn new(graph: &'g Graph, root: NodeIndex, backend: Option<Backend>, config: &JitConfig) -> Self {
        Self::try_new(graph, root, backend, config).unwrap_or_else(|err| fatal(err))
    }

    /// Wraps a closure over `dim` inputs.
    pub fn native(dim: usize, f: impl Fn(&[f64]) -> f64 + 'g) -> Self {
        Function::Native(NativeFunction::new(dim, f))
    }

    pub fn dim(&self) -> usize {
        match self {
            Function::Blueprint(blueprint) => blueprint.dim(),
            Function::Compiled(compiled) => compiled.dim(),
            Function::Native(native) => native.dim(),
        }
    }

    /// Scratch buffer for [`eval`](Self::eval); empty for blueprints, which
    /// cache inside the graph, and for closures.
    pub fn scratch(&self) -> Vec<f64> {
        match self {
            Function::Blueprint(_) | Function::Native(_) => Vec::new(),
            Function::Compiled(compiled) => compiled.scratch(),
        }
    }

    pub fn eval(&self, x: &[f64], scratch: &mut [f64]) -> f64 {
        match self {
            Function::Blueprint(blueprint) => blueprint.eval(x),
            Function::Compiled(compiled) => compiled.eval(x, scratch),
            Function::Native(native) => native.eval(x),
        }
    }

    /// As [`eval`](Self::eval), rejecting a wrong-length `x` instead of
    /// panicking.
    pub fn try_eval(&self, x: &[f64], scratch: &mut [f64]) -> Result<f64, Error> {
        check_dim(self.dim(), x.len())?;
        Ok(self.eval(x, scratch))
    }

    pub fn call(&self, x: &[f64]) -> f64 {
        let mut scratch = self.scratch();
        self.eval(x, &mut scratch)
    }

    pub fn into_compiled(self) -> Option<CompiledFunction> {
        match self {
            Function::Blueprint(_) | Function::Native(_) => None,
            Function::Compiled(compiled) => Some(compiled),
        }
    }
}

/// The gradient of an objective, interpreted, compiled, or approximated.
#[derive(Debug)]
pub enum Gradient<'g> {
    Blueprint(BlueprintGradient<'g>),
    Compiled(CompiledGradient),
    Approximate(ApproximateGradient<'g>),
}

impl<'g> Gradient<'g> {
    /// Differentiates `root` by every variable, then interprets or compiles
    /// the result.
    pub fn try_new(
        graph: &'g Graph,
        root: NodeIndex,
        backend: Option<Backend>,
        config: &JitConfig,
    ) -> Result<Self, Error> {
        let partials = graph.gradient(root)?;
        debug!("Differentiated {root}: graph now holds {} nodes", graph.len());
        Ok(match backend {
            None => Gradient::Blueprint(BlueprintGradient::new(graph, root, partials)),
            Some(backend) => Gradient::Compiled(CompiledGradient::try_compile(
                graph, root, &partials, backend, config,
            )?),
        })
    }

    /// As [`try_new`](Self::try_new), but compilation failures exit the
    /// process. Differentiation errors are still returned.
    pub fn new(
        graph: &'g Graph,
        root: NodeIndex,
        backend: Option<Backend>,
        config: &JitConfig,
    ) -> Result<Self, Error> {
        match Self::try_new(graph, root, backend, config) {
            Err(Error::Jit(err)) => fatal(err),
            other => other,
        }
    }

    /// Finite differences of a closure over `dim` inputs.
    pub fn approximate(dim: usize, f: impl Fn(&[f64]) -> f64 + 'g) -> Self {
        Gradient::Approximate(ApproximateGradient::new(dim, f))
    }

    pub fn dim(&self) -> usize {
        match self {
            Gradient::Blueprint(blueprint) => blueprint.dim(),
            Gradient::Compiled(compiled) => compiled.gradient_indexes().len(),
            Gradient::Approximate(approximate) => approximate.dim(),
        }
    }

    pub fn scratch(&self) -> Vec<f64> {
        match self {
            Gradient::Blueprint(_) | Gradient::Approximate(_) => Vec::new(),
            Gradient::Compiled(compiled) => compiled.scratch(),
        }
    }

    /// Fills `out` with the gradient at `x` and returns the objective value.
    ///
    /// Panics unless both `x` and `out` hold [`dim`](Self::dim) values.
    pub fn eval(&self, x: &[f64], scratch: &mut [f64], out: &mut [f64]) -> f64 {
        match self {
            Gradient::Blueprint(blueprint) => blueprint.eval(x, out),
            Gradient::Compiled(compiled) => compiled.eval(x, scratch, out),
            Gradient::Approximate(approximate) => approximate.eval(x, out),
        }
    }

    /// As [`eval`](Self::eval), rejecting a wrong-length `x` or `out`
    /// instead of panicking.
    pub fn try_eval(&self, x: &[f64], scratch: &mut [f64], out: &mut [f64]) -> Result<f64, Error> {
        let dim = self.dim();
        check_dim(dim, x.len())?;
        check_dim(dim, out.len())?;
        Ok(self.eval(x, scratch, out))
    }

    pub fn call(&self, x: &[f64]) -> Vec<f64> {
        let mut scratch = self.scratch();
        let mut out = vec![0.0; self.dim()];
        self.eval(x, &mut scratch, &mut out);
        out
    }

    pub fn into_compiled(self) -> Option<CompiledGradient> {
        match self {
            Gradient::Blueprint(_) | Gradient::Approximate(_) => None,
            Gradient::Compiled(compiled) => Some(compiled),
        }
    }
}
