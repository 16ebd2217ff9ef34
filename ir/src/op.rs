//! Operation enum covering every node kind of a computation graph.
//!
//! [`Op`] carries only the kind-specific payload. Inputs and output types
//! live on the [`Node`](crate::Node), so one `Op` value describes the
//! operator independently of where it sits in the graph.

use std::fmt;

use crate::shape::{Axes, Shape};
use crate::types::{Activation, BinaryOp, ConstValue, ConvAttrs, UnaryOp};

/// Operator of a graph node.
#[derive(Debug, Clone, PartialEq, strum::EnumDiscriminants)]
#[strum_discriminants(name(OpKind), derive(Hash, PartialOrd, Ord, strum::Display, strum::EnumIter))]
pub enum Op {
    // Leaves
    /// Graph input at position `index` of the parameter list.
    Parameter { index: usize },
    /// Scalar splatted over the node's output shape.
    Constant(ConstValue),

    // Elementwise
    Unary(UnaryOp),
    Binary(BinaryOp),

    // Linear algebra and windows
    /// Rank-2 matrix product `[m, k] x [k, n]`. Inputs: `a, b`.
    Dot,
    /// Inputs: `data, filters`.
    Convolution(ConvAttrs),
    /// Gradient of a convolution with respect to its data. Inputs: `filters, delta`.
    ConvolutionBackpropData { data_shape: Shape, attrs: ConvAttrs },
    /// Gradient of a convolution with respect to its filters. Inputs: `data, delta`.
    ConvolutionBackpropFilters { filters_shape: Shape, attrs: ConvAttrs },

    // Movement
    /// Transpose by `input_order`, then reinterpret row-major as the output shape.
    Reshape { input_order: Axes },
    /// Replicate the input along the output axes listed in `axes`.
    Broadcast { axes: Axes },
    /// Reduce `axes` away by summation.
    Sum { axes: Axes },
    /// Inputs: `data, value` where `value` is a rank-0 fill value.
    Pad { below: Shape, above: Shape },
    Slice { lower: Shape, upper: Shape },

    // Normalization
    /// Inputs: `gamma, beta, input`. Outputs: `normalized, mean, variance`.
    BatchNorm { epsilon: f64 },
    /// Inputs: `gamma, beta, input, mean, variance, delta`. Outputs: `d_input, d_gamma, d_beta`.
    BatchNormBackprop { epsilon: f64 },

    /// Selects output `index` of a multi-output producer.
    GetOutputElement { index: usize },

    // Activation gradients
    /// Inputs: `x, delta`.
    ReluBackprop,
    /// Inputs: `x, delta`.
    SigmoidBackprop,

    // Fused operators
    /// `op(a) x op(b) + broadcast(bias)`. Inputs: `a, b` and an optional `bias`.
    MatmulBias { transpose_a: bool, transpose_b: bool, broadcast_axes: Axes },
    /// Inputs: `data, filters, bias`.
    ConvolutionBias(ConvAttrs),
    /// Inputs: `data, filters`.
    ConvolutionRelu(ConvAttrs),
    /// Inputs: `data, filters, bias`.
    ConvolutionBiasRelu(ConvAttrs),
    /// Inputs: `data, delta`. Outputs: `d_filters, d_bias`.
    ConvolutionBiasBackpropFiltersBias { filters_shape: Shape, attrs: ConvAttrs },
    /// `act0(x) * act1(y)`. Inputs: `x, y`.
    SigmoidMultiply { activations: [Activation; 2] },
    /// Inputs: `x, y, delta`. Outputs: `d_x, d_y`.
    SigmoidMultiplyBackprop { activations: [Activation; 2] },
    /// Inputs: `gamma, beta, input`. Outputs: `relu(normalized), mean, variance`.
    BatchNormRelu { epsilon: f64 },

    // Recurrent
    /// One LSTM cell. Inputs: `x, h_prev, c_prev, w_layer, w_iter, bias`. Outputs: `h, c`.
    Lstm,
    /// `timesteps` chained LSTM cells sharing weights.
    /// Inputs: `w_layer, w_iter, bias, h_0, c_0, x_0 .. x_{n-1}`.
    /// Outputs: `h_0 .. h_{n-1}, c_0 .. c_{n-1}`.
    Rnn { timesteps: usize },
}

impl Op {
    pub fn kind(&self) -> OpKind {
        OpKind::from(self)
    }

    /// Fixed number of inputs, or `None` for operators whose input count
    /// depends on their payload.
    pub fn arity(&self) -> Option<usize> {
        use Op::*;
        Some(match self {
            Parameter { .. } | Constant(_) => 0,
            Unary(_) | Reshape { .. } | Broadcast { .. } | Sum { .. } | Slice { .. } | GetOutputElement { .. } => 1,
            Binary(_)
            | Dot
            | Convolution(_)
            | ConvolutionBackpropData { .. }
            | ConvolutionBackpropFilters { .. }
            | Pad { .. }
            | ReluBackprop
            | SigmoidBackprop
            | ConvolutionRelu(_)
            | ConvolutionBiasBackpropFiltersBias { .. }
            | SigmoidMultiply { .. } => 2,
            BatchNorm { .. } | ConvolutionBias(_) | ConvolutionBiasRelu(_) | BatchNormRelu { .. } => 3,
            SigmoidMultiplyBackprop { .. } => 3,
            BatchNormBackprop { .. } | Lstm => 6,
            MatmulBias { .. } | Rnn { .. } => return None,
        })
    }

    pub fn is_commutative(&self) -> bool {
        matches!(self, Op::Binary(op) if op.is_commutative())
    }

    pub fn is_elementwise(&self) -> bool {
        matches!(self, Op::Unary(_) | Op::Binary(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::Parameter { .. } | Op::Constant(_))
    }
}

/// Dispatch key for patterns and gradient rules.
///
/// Elementwise operators are distinguished by their operator tag, everything
/// else by its [`OpKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKey {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Kind(OpKind),
}

impl OpKey {
    pub fn of(op: &Op) -> Self {
        match op {
            Op::Unary(u) => Self::Unary(*u),
            Op::Binary(b) => Self::Binary(*b),
            other => Self::Kind(other.kind()),
        }
    }

    pub fn is_commutative(&self) -> bool {
        matches!(self, Self::Binary(op) if op.is_commutative())
    }
}

impl From<UnaryOp> for OpKey {
    fn from(op: UnaryOp) -> Self {
        Self::Unary(op)
    }
}

impl From<BinaryOp> for OpKey {
    fn from(op: BinaryOp) -> Self {
        Self::Binary(op)
    }
}

impl From<OpKind> for OpKey {
    fn from(kind: OpKind) -> Self {
        Self::Kind(kind)
    }
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(op) => write!(f, "{op}"),
            Self::Binary(op) => write!(f, "{op}"),
            Self::Kind(kind) => write!(f, "{kind}"),
        }
    }
}
