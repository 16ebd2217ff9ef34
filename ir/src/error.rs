use graft_dtype::DType;
use snafu::Snafu;

use crate::graph::{NodeId, Output, TensorType};
use crate::op::OpKey;
use crate::shape::Shape;
use crate::types::ConstValue;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Shapes or element types that must agree do not.
    #[snafu(display("{context}: type mismatch, expected {expected}, got {actual}"))]
    ShapeMismatch { context: String, expected: TensorType, actual: TensorType },

    /// No gradient rule is registered for a node an autodiff query needs.
    #[snafu(display("no gradient rule registered for {op} (node {node})"))]
    UnsupportedOperator { op: OpKey, node: NodeId },

    /// Pattern or rule that cannot be matched or built as written.
    #[snafu(display("malformed pattern: {reason}"))]
    MalformedPattern { reason: String },

    /// Wrong number of inputs, outputs, seeds or deltas.
    #[snafu(display("{context}: expected {expected} arguments, got {actual}"))]
    ArityMismatch { context: String, expected: usize, actual: usize },

    #[snafu(display("{context}: expected rank {expected}, got rank {actual}"))]
    RankMismatch { context: String, expected: usize, actual: usize },

    #[snafu(display("invalid axes {axes:?} for rank {rank}"))]
    InvalidAxes { axes: Vec<usize>, rank: usize },

    #[snafu(display("invalid permutation {permutation:?}: expected permutation of 0..{rank}"))]
    InvalidPermutation { permutation: Vec<usize>, rank: usize },

    #[snafu(display("reshape size mismatch: input size {input} != output size {output}"))]
    ReshapeSize { input: usize, output: usize },

    #[snafu(display("slice bounds violation: dimension {dim} has range [{lower}, {upper}) but size is {size}"))]
    SliceBounds { dim: usize, lower: usize, upper: usize, size: usize },

    #[snafu(display("dot shape mismatch: {lhs:?} x {rhs:?}"))]
    DotShape { lhs: Shape, rhs: Shape },

    #[snafu(display("convolution shape error: {reason}"))]
    ConvolutionShape { reason: String },

    #[snafu(display("constant {value:?} cannot be stored as {dtype}"))]
    ConstantType { value: ConstValue, dtype: DType },

    #[snafu(display("output {output} does not exist in this graph"))]
    UnknownOutput { output: Output },
}

impl Error {
    /// Errors caused by how rules or gradients were written rather than by
    /// the graph they were applied to.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::MalformedPattern { .. } | Self::ArityMismatch { .. })
    }
}
