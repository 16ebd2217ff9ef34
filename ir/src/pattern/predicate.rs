//! Node predicates used by patterns.
//!
//! Predicates are plain function pointers with a name for debug output, so
//! patterns stay `Clone + Send + Sync` and print readably.

use std::fmt;

use crate::graph::{Graph, Output};
use crate::op::Op;
use crate::shape::{is_identity_order, permute};
use crate::types::ConstValue;

/// Named test over a graph output.
#[derive(Clone, Copy)]
pub struct NodePredicate {
    name: &'static str,
    test: fn(&Graph, Output) -> bool,
}

impl NodePredicate {
    pub const fn new(name: &'static str, test: fn(&Graph, Output) -> bool) -> Self {
        Self { name, test }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn test(&self, graph: &Graph, output: Output) -> bool {
        (self.test)(graph, output)
    }
}

impl fmt::Debug for NodePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePredicate({})", self.name)
    }
}

pub const RESHAPE: NodePredicate = NodePredicate::new("reshape", is_reshape);
pub const TRANSPOSE: NodePredicate = NodePredicate::new("transpose", is_transpose);
pub const ZERO: NodePredicate = NodePredicate::new("zero", is_zero);
pub const ONE: NodePredicate = NodePredicate::new("one", is_one);
pub const ELEMENTWISE: NodePredicate = NodePredicate::new("elementwise", is_elementwise);
pub const PERMUTATION: NodePredicate = NodePredicate::new("permutation", is_permutation_reshape);
pub const LAYOUT: NodePredicate = NodePredicate::new("layout", is_layout_reshape);

#[inline]
pub fn is_reshape(graph: &Graph, output: Output) -> bool {
    matches!(graph.op(output.node), Op::Reshape { .. })
}

/// Rank-2 reshape that swaps the axes and keeps the transposed shape.
pub fn is_transpose(graph: &Graph, output: Output) -> bool {
    let node = graph.node(output.node);
    let Op::Reshape { input_order } = node.op() else {
        return false;
    };
    let input = graph.shape(node.input(0));
    input_order.as_slice() == [1, 0] && node.shape().as_slice() == [input[1], input[0]]
}

/// Reshape that only changes how dimensions are grouped, never their order.
pub fn is_layout_reshape(graph: &Graph, output: Output) -> bool {
    matches!(graph.op(output.node), Op::Reshape { input_order } if is_identity_order(input_order))
}

/// Reshape that only reorders axes: its output shape is the input shape
/// permuted by `input_order`.
pub fn is_permutation_reshape(graph: &Graph, output: Output) -> bool {
    let node = graph.node(output.node);
    let Op::Reshape { input_order } = node.op() else {
        return false;
    };
    permute(graph.shape(node.input(0)), input_order) == *node.shape()
}

/// Constant whose value is exactly zero.
#[inline]
pub fn is_zero(graph: &Graph, output: Output) -> bool {
    try_const(graph, output).is_some_and(|v| v.is_zero())
}

#[inline]
pub fn is_one(graph: &Graph, output: Output) -> bool {
    try_const(graph, output).is_some_and(|v| v.is_one())
}

#[inline]
pub fn is_elementwise(graph: &Graph, output: Output) -> bool {
    graph.op(output.node).is_elementwise()
}

/// Extract const value if present.
#[inline]
pub fn try_const(graph: &Graph, output: Output) -> Option<ConstValue> {
    match graph.op(output.node) {
        Op::Constant(value) => Some(*value),
        _ => None,
    }
}
