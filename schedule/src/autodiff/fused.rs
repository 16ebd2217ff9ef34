//! Gradients of the differentiable fusions.

use smallvec::smallvec;

use graft_ir::{Graph, NodeId, Op, Output, Result};

use super::registry::Deltas;
use super::rules::incoming;
use crate::fusion::unexpected;

/// `y = op(a) op(b) + broadcast(bias)` with `op` an optional transpose.
///
/// With `A = op(a)`, `B = op(b)`: `dA = delta B^T`, `dB = A^T delta`, and a
/// transposed operand receives the transpose of its delta. The bias delta
/// sums the broadcast axes away.
pub fn matmul_bias(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::MatmulBias { transpose_a, transpose_b, broadcast_axes } = graph.op(node).clone() else {
        return unexpected("matmul_bias");
    };
    let (a, b) = (graph.node(node).input(0), graph.node(node).input(1));

    let da = if transpose_a {
        graph.matmul_bias(b, delta, None, transpose_b, true, &[])?
    } else {
        graph.matmul_bias(delta, b, None, false, !transpose_b, &[])?
    };
    let db = if transpose_b {
        graph.matmul_bias(delta, a, None, true, transpose_a, &[])?
    } else {
        graph.matmul_bias(a, delta, None, !transpose_a, false, &[])?
    };

    let mut result: Deltas = smallvec![Some(da.output(0)), Some(db.output(0))];
    if graph.node(node).inputs().len() == 3 {
        result.push(Some(graph.sum(delta, &broadcast_axes)?.output(0)));
    }
    Ok(result)
}

pub fn convolution_bias(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::ConvolutionBias(attrs) = graph.op(node).clone() else {
        return unexpected("convolution_bias");
    };
    let (data, filters) = (graph.node(node).input(0), graph.node(node).input(1));
    let (data_shape, filters_shape) = (graph.shape(data).clone(), graph.shape(filters).clone());
    let d_data = graph.convolution_backprop_data(&data_shape, filters, delta, attrs.clone())?;
    let d_filters_bias = graph.convolution_bias_backprop_filters_bias(data, &filters_shape, delta, attrs)?;
    Ok(smallvec![Some(d_data.output(0)), Some(d_filters_bias.output(0)), Some(d_filters_bias.output(1))])
}

pub fn sigmoid_multiply(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::SigmoidMultiply { activations } = *graph.op(node) else {
        return unexpected("sigmoid_multiply");
    };
    let (x, y) = (graph.node(node).input(0), graph.node(node).input(1));
    let backprop = graph.sigmoid_multiply_backprop(x, y, delta, activations)?;
    Ok(smallvec![Some(backprop.output(0)), Some(backprop.output(1))])
}
