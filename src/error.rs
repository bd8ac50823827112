use std::path::PathBuf;

use thiserror::Error;

use crate::graph::MathFunction;

/// Errors surfaced to callers of the recording, differentiation, and
/// optimization APIs.
#[derive(Error, Debug)]
pub enum Error {
    #[error("A recording context is already active on this thread")]
    ConcurrentEvaluationAttempt,
    #[error("Cannot differentiate `{0}`")]
    NonDifferentiable(MathFunction),
    #[error("Optimization failed: {0}")]
    Optimization(String),
    #[error("Backtracking found no finite step within {0} iterations")]
    Backtracking(usize),
    #[error("Expected {expected} inputs, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Jit(#[from] JitError),
}

/// Failures while producing a compiled artifact.
///
/// These indicate a broken deployment (missing assembler, no executable
/// mappings allowed, ...). The non-`try_` constructors turn them into a
/// process exit via [`crate::jit::fatal`].
#[derive(Error, Debug)]
pub enum JitError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Toolchain {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("I/O error in {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to load {path:?}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("Symbol `{0}` missing from compiled library")]
    MissingSymbol(&'static str),
    #[error("Executable memory: {0}")]
    ExecutableMemory(&'static str),
    #[error("Scratch slot {0} does not fit a 32-bit displacement")]
    DisplacementOverflow(usize),
    #[error("The {0} backend requires an x86-64 unix target")]
    UnsupportedTarget(&'static str),
}
