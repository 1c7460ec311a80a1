//! Closed operation vocabulary shared by every kernel implementation.
//!
//! These enums are the only operations a backend is expected to carry.
//! Adding an entry means adding a variant here plus a kernel in every backend.

use std::fmt;

/// Binary arithmetic applied lane-by-lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 4] = [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div];

    /// Kernel name stem (`add`, `sub`, ...).
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unary functions available to `transform`.
///
/// Only [`UnaryFunction::Abs`] and [`UnaryFunction::Neg`] are defined for
/// integer element types; the rest require a floating-point element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryFunction {
    Sin,
    Cos,
    Tan,
    Tanh,
    Ceil,
    Floor,
    Exp,
    Log,
    Sqrt,
    Abs,
    Neg,
}

impl UnaryFunction {
    pub const ALL: [UnaryFunction; 11] = [
        UnaryFunction::Sin,
        UnaryFunction::Cos,
        UnaryFunction::Tan,
        UnaryFunction::Tanh,
        UnaryFunction::Ceil,
        UnaryFunction::Floor,
        UnaryFunction::Exp,
        UnaryFunction::Log,
        UnaryFunction::Sqrt,
        UnaryFunction::Abs,
        UnaryFunction::Neg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UnaryFunction::Sin => "sin",
            UnaryFunction::Cos => "cos",
            UnaryFunction::Tan => "tan",
            UnaryFunction::Tanh => "tanh",
            UnaryFunction::Ceil => "ceil",
            UnaryFunction::Floor => "floor",
            UnaryFunction::Exp => "exp",
            UnaryFunction::Log => "log",
            UnaryFunction::Sqrt => "sqrt",
            UnaryFunction::Abs => "abs",
            UnaryFunction::Neg => "neg",
        }
    }

    /// Look up a catalog entry by its kernel name stem.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Whether this function is only defined for floating-point elements.
    pub fn requires_float(self) -> bool {
        !matches!(self, UnaryFunction::Abs | UnaryFunction::Neg)
    }
}

impl fmt::Display for UnaryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reductions collapsing one or two arrays into a single scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Sum of all elements.
    Sum,
    /// Sum of absolute values.
    AbsSum,
    /// Inner product of two equal-length arrays.
    Dot,
}

impl ReduceOp {
    pub const ALL: [ReduceOp; 3] = [ReduceOp::Sum, ReduceOp::AbsSum, ReduceOp::Dot];

    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::AbsSum => "asum",
            ReduceOp::Dot => "dot",
        }
    }

    /// Number of input arrays the reduction reads.
    pub fn arity(self) -> usize {
        match self {
            ReduceOp::Sum | ReduceOp::AbsSum => 1,
            ReduceOp::Dot => 2,
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
