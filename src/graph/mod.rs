//! The expression graph: an append-only node store shared by the
//! evaluator, the differentiator, and the JIT backends.
//!
//! A [`Graph`] is owned by a [`Context`] while an expression is being
//! recorded. [`Term`] handles borrow the graph, so they cannot outlive it;
//! compiled artifacts copy what they need and can.
//!
//! Both the evaluator and the differentiator walk the graph with an explicit
//! work stack of [`Frame`]s instead of recursion, so expressions built from
//! long loops (hundreds of thousands of nodes deep) are safe.

mod context;
mod diff;
mod eval;
mod node;
mod term;

#[cfg(test)]
mod tests;

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;

pub use context::Context;
pub use diff::{approximate_derivative, approximate_gradient, FINITE_DIFFERENCE_EPS};
pub use eval::Reuse;
pub use node::{ramp, unit_step, MathFunction, Node, NodeIndex, Operation};
pub use term::Term;

/// Work-stack frame for the two-visit traversals.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Frame {
    /// First visit: schedule the children.
    Enter(NodeIndex),
    /// Second visit: children are done, combine them.
    Combine(NodeIndex),
}

/// Node store plus the per-graph caches.
#[derive(Debug)]
pub struct Graph {
    dim: usize,
    store: RefCell<Store>,
}

#[derive(Debug, Default)]
pub(crate) struct Store {
    pub(crate) nodes: Vec<Node>,
    /// Keyed on the bit pattern so `-0.0` and `0.0` stay distinct.
    constants: HashMap<u64, NodeIndex>,
    /// Evaluator cache: `values[i]` is valid when `computed[i]`.
    pub(crate) computed: Vec<bool>,
    pub(crate) values: Vec<f64>,
    /// `memo[variable][node]`, filled lazily, never overwritten.
    pub(crate) memo: Vec<Vec<Option<NodeIndex>>>,
}

impl Store {
    fn push(&mut self, node: Node) -> NodeIndex {
        let index = self.nodes.len();
        assert!(
            index < u32::MAX as usize,
            "expression graph is limited to u32::MAX nodes"
        );
        self.nodes.push(node);
        NodeIndex(index as u32)
    }

    #[inline]
    pub(crate) fn node(&self, index: NodeIndex) -> Node {
        self.nodes[index.index()]
    }

    pub(crate) fn constant(&mut self, value: f64) -> NodeIndex {
        if let Some(&index) = self.constants.get(&value.to_bits()) {
            return index;
        }
        let index = self.push(Node::Constant(value));
        self.constants.insert(value.to_bits(), index);
        index
    }

    pub(crate) fn operation(&mut self, op: Operation, lhs: NodeIndex, rhs: NodeIndex) -> NodeIndex {
        self.push(Node::Operation { op, lhs, rhs })
    }

    pub(crate) fn function(&mut self, function: MathFunction, arg: NodeIndex) -> NodeIndex {
        self.push(Node::Function { function, arg })
    }

    #[inline]
    pub(crate) fn is_constant(&self, index: NodeIndex, value: f64) -> bool {
        self.node(index).is_constant(value)
    }
}

impl Graph {
    /// Creates a graph whose first `dim` nodes are the input variables.
    pub fn new(dim: usize) -> Self {
        assert!(dim < u32::MAX as usize, "too many input variables");
        let mut store = Store::default();
        for slot in 0..dim {
            store.push(Node::Variable(slot as u32));
        }
        Graph {
            dim,
            store: RefCell::new(store),
        }
    }

    /// Number of input variables.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of nodes, variables and derivatives included.
    pub fn len(&self) -> usize {
        self.store.borrow().nodes.len()
    }

    /// Only a graph over zero variables with nothing recorded is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Panics if `index` is not from this graph.
    pub fn node(&self, index: NodeIndex) -> Node {
        self.store.borrow().node(index)
    }

    /// Number of distinct constant nodes.
    pub fn constant_count(&self) -> usize {
        self.store.borrow().constants.len()
    }

    /// The variable node for input `slot`.
    pub fn variable(&self, slot: usize) -> NodeIndex {
        assert!(slot < self.dim, "variable {slot} out of range 0..{}", self.dim);
        NodeIndex(slot as u32)
    }

    /// Records `value`, or returns the node already holding its bit pattern.
    pub fn constant(&self, value: f64) -> NodeIndex {
        self.store.borrow_mut().constant(value)
    }

    /// Appends `lhs op rhs`. Nothing is folded or deduplicated.
    pub fn operation(&self, op: Operation, lhs: NodeIndex, rhs: NodeIndex) -> NodeIndex {
        self.store.borrow_mut().operation(op, lhs, rhs)
    }

    /// Appends `function(arg)`.
    pub fn function(&self, function: MathFunction, arg: NodeIndex) -> NodeIndex {
        self.store.borrow_mut().function(function, arg)
    }

    pub(crate) fn store(&self) -> Ref<'_, Store> {
        self.store.borrow()
    }

    pub(crate) fn store_mut(&self) -> RefMut<'_, Store> {
        self.store.borrow_mut()
    }

    /// Renders the expression rooted at `root` in infix form.
    ///
    /// Shared sub-expressions are printed once per use, so the output can be
    /// exponentially larger than the graph. Meant for debugging small graphs.
    pub fn render(&self, root: NodeIndex) -> String {
        let store = self.store();
        let mut stack = vec![Frame::Enter(root)];
        let mut rendered: Vec<String> = Vec::new();
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(index) => match store.node(index) {
                    Node::Variable(slot) => rendered.push(format!("x[{slot}]")),
                    Node::Constant(value) => rendered.push(format!("{value}")),
                    Node::Operation { lhs, rhs, .. } => {
                        stack.push(Frame::Combine(index));
                        stack.push(Frame::Enter(rhs));
                        stack.push(Frame::Enter(lhs));
                    }
                    Node::Function { arg, .. } => {
                        stack.push(Frame::Combine(index));
                        stack.push(Frame::Enter(arg));
                    }
                },
                Frame::Combine(index) => match store.node(index) {
                    Node::Operation { op, .. } => {
                        let rhs = rendered.pop().unwrap_or_default();
                        let lhs = rendered.pop().unwrap_or_default();
                        rendered.push(format!("({lhs} {} {rhs})", op.symbol()));
                    }
                    Node::Function { function, .. } => {
                        let arg = rendered.pop().unwrap_or_default();
                        rendered.push(format!("{function}({arg})"));
                    }
                    Node::Variable(_) | Node::Constant(_) => {}
                },
            }
        }
        rendered.pop().unwrap_or_default()
    }
}
