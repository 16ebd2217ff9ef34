//! Generators for property-based testing.
//!
//! Random graphs are described by a list of [`NodeRecipe`]s and built over
//! two `f32[2, 3]` parameters; operand indices wrap around the nodes built so
//! far, so every recipe list yields a valid graph.

use proptest::prelude::*;

use graft_dtype::DType;

use crate::graph::{Graph, NodeId, Output};
use crate::types::{BinaryOp, UnaryOp};

pub const RECIPE_SHAPE: [usize; 2] = [2, 3];

/// Generate elementwise unary ops that are defined on every real input.
pub fn arb_total_unary_op() -> impl Strategy<Value = UnaryOp> {
    prop_oneof![Just(UnaryOp::Neg), Just(UnaryOp::Tanh), Just(UnaryOp::Sigmoid), Just(UnaryOp::Exp)]
}

/// Generate arithmetic BinaryOp without division.
pub fn arb_arithmetic_binary_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![Just(BinaryOp::Add), Just(BinaryOp::Mul), Just(BinaryOp::Sub), Just(BinaryOp::Max)]
}

/// Generate commutative BinaryOp.
pub fn arb_commutative_binary_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![Just(BinaryOp::Add), Just(BinaryOp::Mul), Just(BinaryOp::Max), Just(BinaryOp::Min)]
}

/// One node of a generated graph.
#[derive(Debug, Clone)]
pub enum NodeRecipe {
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    /// Transpose there and back: two nodes no elementwise fusion crosses.
    Barrier(usize),
}

pub fn arb_recipe() -> impl Strategy<Value = NodeRecipe> {
    prop_oneof![
        3 => (arb_total_unary_op(), any::<usize>()).prop_map(|(op, a)| NodeRecipe::Unary(op, a)),
        4 => (arb_arithmetic_binary_op(), any::<usize>(), any::<usize>())
            .prop_map(|(op, a, b)| NodeRecipe::Binary(op, a, b)),
        1 => any::<usize>().prop_map(NodeRecipe::Barrier),
    ]
}

/// Graph of up to `max_nodes` recipes; every sink becomes a result.
pub fn arb_elementwise_graph(max_nodes: usize) -> impl Strategy<Value = Graph> {
    prop::collection::vec(arb_recipe(), 1..max_nodes).prop_map(|recipes| build_recipe_graph(&recipes))
}

pub fn build_recipe_graph(recipes: &[NodeRecipe]) -> Graph {
    let mut graph = Graph::new();
    let mut nodes: Vec<NodeId> = (0..2).map(|_| graph.parameter(DType::Float32, &RECIPE_SHAPE)).collect();
    let mut used = vec![false; nodes.len()];

    for recipe in recipes {
        let mut pick = |i: usize| {
            let idx = i % nodes.len();
            used[idx] = true;
            nodes[idx]
        };
        let id = match *recipe {
            NodeRecipe::Unary(op, a) => {
                let a = pick(a);
                graph.unary(op, a).unwrap()
            }
            NodeRecipe::Binary(op, a, b) => {
                let (a, b) = (pick(a), pick(b));
                graph.binary(op, a, b).unwrap()
            }
            NodeRecipe::Barrier(a) => {
                let a = pick(a);
                let t = graph.transpose(a).unwrap();
                graph.transpose(t).unwrap()
            }
        };
        nodes.push(id);
        used.push(false);
    }

    let sinks: Vec<Output> =
        nodes.iter().zip(&used).skip(2).filter(|(_, used)| !**used).map(|(id, _)| id.output(0)).collect();
    graph.set_results(sinks).unwrap();
    graph
}
