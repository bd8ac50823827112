use super::{Frame, Graph, Node, NodeIndex, Store};

/// Whether an evaluation may reuse node values cached by earlier calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reuse {
    /// Keep values computed since the last invalidation. Only correct when
    /// the inputs have not changed, e.g. across the components of one
    /// gradient.
    Keep,
    /// Forget every cached value first.
    Invalidate,
}

impl Graph {
    /// Evaluates `root` at `x`.
    pub fn eval(&self, root: NodeIndex, x: &[f64], reuse: Reuse) -> f64 {
        assert_eq!(
            x.len(),
            self.dim,
            "expected {} inputs, got {}",
            self.dim,
            x.len()
        );
        self.store_mut().evaluate(root, x, reuse)
    }
}

impl Store {
    pub(crate) fn evaluate(&mut self, root: NodeIndex, x: &[f64], reuse: Reuse) -> f64 {
        if reuse == Reuse::Invalidate {
            self.computed.clear();
        }
        let len = self.nodes.len();
        self.computed.resize(len, false);
        self.values.resize(len, 0.0);

        let mut stack = vec![Frame::Enter(root)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(index) => {
                    let i = index.index();
                    if self.computed[i] {
                        continue;
                    }
                    match self.nodes[i] {
                        Node::Variable(slot) => self.store_value(i, x[slot as usize]),
                        Node::Constant(value) => self.store_value(i, value),
                        Node::Operation { lhs, rhs, .. } => {
                            stack.push(Frame::Combine(index));
                            if !self.computed[rhs.index()] {
                                stack.push(Frame::Enter(rhs));
                            }
                            if !self.computed[lhs.index()] {
                                stack.push(Frame::Enter(lhs));
                            }
                        }
                        Node::Function { arg, .. } => {
                            stack.push(Frame::Combine(index));
                            if !self.computed[arg.index()] {
                                stack.push(Frame::Enter(arg));
                            }
                        }
                    }
                }
                Frame::Combine(index) => {
                    let i = index.index();
                    let value = match self.nodes[i] {
                        Node::Operation { op, lhs, rhs } => {
                            op.apply(self.values[lhs.index()], self.values[rhs.index()])
                        }
                        Node::Function { function, arg } => function.apply(self.values[arg.index()]),
                        Node::Variable(_) | Node::Constant(_) => continue,
                    };
                    self.store_value(i, value);
                }
            }
        }
        self.values[root.index()]
    }

    #[inline]
    fn store_value(&mut self, i: usize, value: f64) {
        self.values[i] = value;
        self.computed[i] = true;
    }
}
