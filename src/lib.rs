//! Symbolic expression graphs with automatic differentiation, native-code
//! compilation, and gradient-based optimizers.
//!
//! ```no_run
//! use gradjit::{Objective, Optimizer, Scalar};
//!
//! struct Bowl;
//!
//! impl Objective for Bowl {
//!     fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
//!         (x[0] + 1.0).sqr() + (x[1] + 2.0).sqr()
//!     }
//! }
//!
//! let result = Optimizer::new().optimize(&Bowl, &[0.0, 0.0]).unwrap();
//! assert!(result.value < 1e-12);
//! ```

pub mod config;
pub mod error;
pub mod function;
pub mod graph;
pub mod jit;
pub mod optimize;
pub mod scalar;

pub use error::{Error, JitError};
pub use function::{CompiledFunction, CompiledGradient, Function, Gradient};
pub use graph::{Context, Graph, MathFunction, Node, NodeIndex, Operation, Term};
pub use jit::Backend;
pub use optimize::{
    Algorithm, Direction, EarlyStop, Objective, ObjectiveValue, OptimizationProgress,
    OptimizationResult, Optimizer, TerminationReason, ValueAndPoint,
};
pub use scalar::Scalar;
