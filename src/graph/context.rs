use std::cell::Cell;
use std::marker::PhantomData;

use log::debug;

use super::{Graph, Term};
use crate::error::Error;

thread_local! {
    static RECORDING: Cell<bool> = const { Cell::new(false) };
}

/// Owns the [`Graph`] an expression is recorded into.
///
/// At most one `Context` may be alive per thread. The type is `!Send` so the
/// claim is always released on the thread that made it.
pub struct Context {
    graph: Graph,
    _not_send: PhantomData<*const ()>,
}

impl Context {
    /// Opens a recording context over `dim` input variables.
    ///
    /// Fails with [`Error::ConcurrentEvaluationAttempt`] if this thread
    /// already has one open.
    pub fn new(dim: usize) -> Result<Self, Error> {
        let claimed = RECORDING.with(|recording| {
            if recording.get() {
                false
            } else {
                recording.set(true);
                true
            }
        });
        if !claimed {
            return Err(Error::ConcurrentEvaluationAttempt);
        }
        debug!("Recording context opened over {dim} variables");
        Ok(Context {
            graph: Graph::new(dim),
            _not_send: PhantomData,
        })
    }

    /// Whether the current thread has a context open.
    pub fn is_active() -> bool {
        RECORDING.with(Cell::get)
    }

    pub fn dim(&self) -> usize {
        self.graph.dim()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Handles for every input variable, in slot order.
    pub fn x(&self) -> Vec<Term<'_>> {
        (0..self.dim()).map(|slot| self.var(slot)).collect()
    }

    /// Panics if `slot >= dim`.
    pub fn var(&self, slot: usize) -> Term<'_> {
        Term::new(&self.graph, self.graph.variable(slot))
    }

    pub fn constant(&self, value: f64) -> Term<'_> {
        Term::new(&self.graph, self.graph.constant(value))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        debug!("Recording context closed after {} nodes", self.graph.len());
        RECORDING.with(|recording| recording.set(false));
    }
}
