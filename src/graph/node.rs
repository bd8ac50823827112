//! Fixed-size tagged nodes of the expression graph.

use std::fmt;

/// Position of a node in its [`Graph`](super::Graph).
///
/// Children always have a smaller index than their parents because the
/// store is append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub(crate) u32);

impl NodeIndex {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Binary arithmetic. Operands are the left and right child in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operation {
    /// IEEE-754 semantics: division by zero gives an infinity or NaN.
    #[inline]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Operation::Add => lhs + rhs,
            Operation::Sub => lhs - rhs,
            Operation::Mul => lhs * rhs,
            Operation::Div => lhs / rhs,
        }
    }

    /// Infix symbol, shared by rendering and the C backend.
    pub fn symbol(self) -> char {
        match self {
            Operation::Add => '+',
            Operation::Sub => '-',
            Operation::Mul => '*',
            Operation::Div => '/',
        }
    }
}

/// Unary math functions a node can apply.
///
/// The declaration order is the layout of the native backend's function
/// pointer table; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathFunction {
    Sqr,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    UnitStep,
    Ramp,
}

impl MathFunction {
    pub const ALL: [MathFunction; 12] = [
        MathFunction::Sqr,
        MathFunction::Sqrt,
        MathFunction::Exp,
        MathFunction::Log,
        MathFunction::Sin,
        MathFunction::Cos,
        MathFunction::Tan,
        MathFunction::Asin,
        MathFunction::Acos,
        MathFunction::Atan,
        MathFunction::UnitStep,
        MathFunction::Ramp,
    ];

    /// Slot in the native function pointer table.
    #[inline]
    pub fn table_index(self) -> usize {
        self as usize
    }

    /// Name as it appears in emitted source and in libm.
    pub fn name(self) -> &'static str {
        match self {
            MathFunction::Sqr => "sqr",
            MathFunction::Sqrt => "sqrt",
            MathFunction::Exp => "exp",
            MathFunction::Log => "log",
            MathFunction::Sin => "sin",
            MathFunction::Cos => "cos",
            MathFunction::Tan => "tan",
            MathFunction::Asin => "asin",
            MathFunction::Acos => "acos",
            MathFunction::Atan => "atan",
            MathFunction::UnitStep => "unit_step",
            MathFunction::Ramp => "ramp",
        }
    }

    /// Whether the function resolves to a libm symbol rather than being
    /// expanded inline by the emitters.
    pub fn is_libm(self) -> bool {
        !matches!(
            self,
            MathFunction::Sqr | MathFunction::UnitStep | MathFunction::Ramp
        )
    }

    /// Evaluates with libm semantics; out-of-domain inputs give NaN.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            MathFunction::Sqr => x * x,
            MathFunction::Sqrt => x.sqrt(),
            MathFunction::Exp => x.exp(),
            MathFunction::Log => x.ln(),
            MathFunction::Sin => x.sin(),
            MathFunction::Cos => x.cos(),
            MathFunction::Tan => x.tan(),
            MathFunction::Asin => x.asin(),
            MathFunction::Acos => x.acos(),
            MathFunction::Atan => x.atan(),
            MathFunction::UnitStep => unit_step(x),
            MathFunction::Ramp => ramp(x),
        }
    }
}

impl fmt::Display for MathFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `1` for `x >= 0`, `0` otherwise (including NaN).
#[inline]
pub fn unit_step(x: f64) -> f64 {
    if x >= 0.0 {
        1.0
    } else {
        0.0
    }
}

/// `x` for `x > 0`, `0` otherwise (including NaN).
#[inline]
pub fn ramp(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// One entry of the graph store.
///
/// Nodes are `Copy` and hold no pointers; children are referenced by
/// [`NodeIndex`] and always precede their parent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Node {
    /// Slot in the input vector.
    Variable(u32),
    /// Literal value. At most one node per bit pattern.
    Constant(f64),
    /// `lhs op rhs`.
    Operation {
        op: Operation,
        lhs: NodeIndex,
        rhs: NodeIndex,
    },
    /// `function(arg)`.
    Function {
        function: MathFunction,
        arg: NodeIndex,
    },
}

impl Node {
    /// Constant value, if this node is one.
    #[inline]
    pub fn constant(&self) -> Option<f64> {
        match *self {
            Node::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Compares with `==`, so `-0.0` matches `0.0` and NaN matches nothing.
    #[inline]
    pub fn is_constant(&self, value: f64) -> bool {
        self.constant() == Some(value)
    }
}
