//! Compilation of expression graphs to native code.
//!
//! Every backend lowers the same [`Schedule`] and produces code with one
//! ABI: `f64 eval(const f64* x, f64* heap)`, where `heap` holds at least
//! `heap_size()` doubles and node `i` is written to `heap[i]`.
//!
//! - [`Backend::Nasm`], [`Backend::GnuAs`], [`Backend::Clang`] emit source
//!   text, run an external toolchain, and load the shared object.
//! - [`Backend::X64Native`] encodes x86-64 directly into executable memory.
//!
//! Failures here mean the deployment is broken. The `try_` entry points
//! return them; the others report through [`fatal`] and exit.

pub mod executable;
pub mod native;
pub mod schedule;
pub mod source;
pub mod toolchain;
pub mod x86_64;

use std::time::Instant;

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::config::JitConfig;
use crate::error::JitError;
use crate::graph::{Graph, NodeIndex};
use native::NativeCode;
use schedule::Schedule;
use toolchain::SharedLibrary;

/// Code generator used for compiled functions and gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Nasm,
    GnuAs,
    Clang,
    X64Native,
}

impl Backend {
    pub const ALL: [Backend; 4] = [Backend::Nasm, Backend::GnuAs, Backend::Clang, Backend::X64Native];

    pub fn name(self) -> &'static str {
        match self {
            Backend::Nasm => "nasm",
            Backend::GnuAs => "gnu_as",
            Backend::Clang => "clang",
            Backend::X64Native => "x64_native",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Logs `err` and terminates the process.
pub fn fatal(err: JitError) -> ! {
    error!("Fatal JIT failure: {err}");
    eprintln!("gradjit: fatal JIT failure: {err}");
    std::process::exit(1)
}

/// Code produced by one of the backends. Owns everything it needs, so it
/// outlives the graph it was compiled from.
#[derive(Debug)]
pub enum Compiled {
    Library(SharedLibrary),
    Native(NativeCode),
}

impl Compiled {
    /// Compiles code returning the value of `roots[0]`, computing every
    /// other root into its heap slot on the way.
    pub fn try_new(
        backend: Backend,
        graph: &Graph,
        roots: &[NodeIndex],
        config: &JitConfig,
    ) -> Result<Self, JitError> {
        assert!(!roots.is_empty(), "nothing to compile");
        let started = Instant::now();
        let schedule = Schedule::new(graph, roots);
        let entry = if roots.len() == 1 { "eval_f" } else { "eval_g" };
        let compiled = match backend {
            Backend::X64Native => Compiled::Native(NativeCode::new(&schedule, roots[0], graph.dim())?),
            Backend::Nasm | Backend::GnuAs | Backend::Clang => Compiled::Library(toolchain::build(
                backend,
                &schedule,
                roots[0],
                entry,
                graph.dim(),
                config,
            )?),
        };
        debug!(
            "Compiled {entry} ({} nodes, heap {}) with {backend} in {:?}",
            schedule.steps.len(),
            schedule.heap_size,
            started.elapsed()
        );
        Ok(compiled)
    }

    pub fn dim(&self) -> usize {
        match self {
            Compiled::Library(library) => library.dim(),
            Compiled::Native(native) => native.dim(),
        }
    }

    pub fn heap_size(&self) -> usize {
        match self {
            Compiled::Library(library) => library.heap_size(),
            Compiled::Native(native) => native.heap_size(),
        }
    }

    #[inline]
    pub fn eval(&self, x: &[f64], heap: &mut [f64]) -> f64 {
        match self {
            Compiled::Library(library) => library.eval(x, heap),
            Compiled::Native(native) => native.eval(x, heap),
        }
    }
}
