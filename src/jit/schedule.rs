//! Shared lowering step for every backend: the order in which the nodes
//! reachable from a set of roots must be computed.

use crate::graph::{Frame, Graph, Node, NodeIndex};

/// Nodes in dependency order, each listed once.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub steps: Vec<(NodeIndex, Node)>,
    /// One more than the largest scheduled index; the scratch buffer size.
    pub heap_size: usize,
}

impl Schedule {
    /// Schedules everything `roots` depend on, in root order.
    pub fn new(graph: &Graph, roots: &[NodeIndex]) -> Self {
        let store = graph.store();
        let mut scheduled = vec![false; store.nodes.len()];
        let mut steps = Vec::new();
        let mut stack = Vec::new();

        for &root in roots {
            stack.push(Frame::Enter(root));
            while let Some(frame) = stack.pop() {
                match frame {
                    Frame::Enter(index) => {
                        if scheduled[index.index()] {
                            continue;
                        }
                        let node = store.node(index);
                        match node {
                            Node::Variable(_) | Node::Constant(_) => {
                                scheduled[index.index()] = true;
                                steps.push((index, node));
                            }
                            Node::Operation { lhs, rhs, .. } => {
                                stack.push(Frame::Combine(index));
                                stack.push(Frame::Enter(rhs));
                                stack.push(Frame::Enter(lhs));
                            }
                            Node::Function { arg, .. } => {
                                stack.push(Frame::Combine(index));
                                stack.push(Frame::Enter(arg));
                            }
                        }
                    }
                    Frame::Combine(index) => {
                        if !scheduled[index.index()] {
                            scheduled[index.index()] = true;
                            steps.push((index, store.node(index)));
                        }
                    }
                }
            }
        }

        let heap_size = steps
            .iter()
            .map(|(index, _)| index.index() + 1)
            .max()
            .unwrap_or(0);
        Schedule { steps, heap_size }
    }
}
