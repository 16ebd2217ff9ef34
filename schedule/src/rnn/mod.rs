//! Recurrent fusion.
//!
//! - [`LstmFusion`] recognizes one unrolled LSTM cell and replaces it with an
//!   `Lstm` node.
//! - [`RnnFusion`] chains `Lstm` nodes that pass hidden and cell state to
//!   each other and share weight and bias nodes into one `Rnn`.
//! - [`RnnMatFusion`] batches per-timestep input projections over the same
//!   data, weights and bias into one `MatmulBias`.

mod chain;
mod lstm;
mod projection;

use graft_ir::{Graph, NodePredicate, Op, Output};

pub use chain::RnnFusion;
pub use lstm::LstmFusion;
pub use projection::RnnMatFusion;

/// Bias `[n]` broadcast along the rows of a `[m, n]` matrix.
fn is_row_broadcast(graph: &Graph, output: Output) -> bool {
    matches!(graph.op(output.node), Op::Broadcast { axes } if axes.as_slice() == [0])
}

const ROW_BROADCAST: NodePredicate = NodePredicate::new("row_broadcast", is_row_broadcast);
