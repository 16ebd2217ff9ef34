//! Gradient rules of the primitive operators.
//!
//! Each rule reads its node's inputs and outputs and appends the delta
//! computation to the graph. Rules for single-output operators read the
//! delta of slot 0; the propagator only calls a rule when some slot received
//! one.

use smallvec::smallvec;
use snafu::OptionExt;

use graft_ir::error::ArityMismatchSnafu;
use graft_ir::shape::{identity_order, inverse_permutation, is_identity_order, permute};
use graft_ir::{Graph, NodeId, Op, Output, Result, UnaryOp};

use super::registry::Deltas;
use crate::fusion::unexpected;

/// Delta of the only output.
pub(super) fn incoming(deltas: &[Option<Output>]) -> Result<Output> {
    deltas.first().copied().flatten().context(ArityMismatchSnafu {
        context: "gradient rule deltas",
        expected: 1usize,
        actual: 0usize,
    })
}

/// Rank-0 zero of the same element type as `like`.
pub(super) fn scalar_zero(graph: &mut Graph, like: Output) -> NodeId {
    let dtype = graph.dtype(like);
    graph.zero(dtype)
}

fn single(delta: impl Into<Output>) -> Deltas {
    smallvec![Some(delta.into())]
}

fn pair(a: impl Into<Output>, b: impl Into<Output>) -> Deltas {
    smallvec![Some(a.into()), Some(b.into())]
}

// =============================================================================
// Elementwise
// =============================================================================

pub fn neg(graph: &mut Graph, _node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    Ok(single(graph.neg(delta)?))
}

pub fn abs(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let sign = graph.unary(UnaryOp::Sign, graph.node(node).input(0))?;
    Ok(single(graph.mul(delta, sign)?))
}

pub fn exp(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    Ok(single(graph.mul(delta, node)?))
}

pub fn log(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    Ok(single(graph.div(delta, graph.node(node).input(0))?))
}

/// `d/dx sqrt(x) = 1 / (2 sqrt(x))`
pub fn sqrt(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let twice = graph.add(node, node)?;
    Ok(single(graph.div(delta, twice)?))
}

/// `d/dx tanh(x) = 1 - tanh(x)^2`
pub fn tanh(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let one = graph.ones_like(node)?;
    let square = graph.mul(node, node)?;
    let slope = graph.sub(one, square)?;
    Ok(single(graph.mul(delta, slope)?))
}

pub fn sigmoid(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    Ok(single(graph.sigmoid_backprop(graph.node(node).input(0), delta)?))
}

pub fn relu(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    Ok(single(graph.relu_backprop(graph.node(node).input(0), delta)?))
}

pub fn add(_graph: &mut Graph, _node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    Ok(pair(delta, delta))
}

pub fn sub(graph: &mut Graph, _node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    Ok(pair(delta, graph.neg(delta)?))
}

pub fn mul(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let (a, b) = (graph.node(node).input(0), graph.node(node).input(1));
    Ok(pair(graph.mul(delta, b)?, graph.mul(delta, a)?))
}

/// `y = a / b`: `da = delta / b`, `db = -delta * y / b`
pub fn div(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let b = graph.node(node).input(1);
    let da = graph.div(delta, b)?;
    let scaled = graph.mul(delta, node)?;
    let scaled = graph.div(scaled, b)?;
    Ok(pair(da, graph.neg(scaled)?))
}

// =============================================================================
// Linear algebra and movement
// =============================================================================

/// `y = a b`: `da = delta b^T`, `db = a^T delta`
pub fn dot(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let (a, b) = (graph.node(node).input(0), graph.node(node).input(1));
    let bt = graph.transpose(b)?;
    let da = graph.dot(delta, bt)?;
    let at = graph.transpose(a)?;
    Ok(pair(da, graph.dot(at, delta)?))
}

/// Regroups the delta into the permuted input shape, then undoes the
/// permutation.
pub fn reshape(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::Reshape { input_order } = graph.op(node).clone() else {
        return unexpected("reshape");
    };
    let input = graph.shape(graph.node(node).input(0)).clone();
    let permuted = permute(&input, &input_order);

    let mut current = delta;
    if graph.shape(current) != &permuted {
        current = graph.reshape(current, &identity_order(graph.shape(current).len()), &permuted)?.output(0);
    }
    if !is_identity_order(&input_order) {
        current = graph.reshape(current, &inverse_permutation(&input_order), &input)?.output(0);
    }
    Ok(single(current))
}

pub fn broadcast(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::Broadcast { axes } = graph.op(node).clone() else {
        return unexpected("broadcast");
    };
    Ok(single(graph.sum(delta, &axes)?))
}

pub fn sum(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::Sum { axes } = graph.op(node).clone() else {
        return unexpected("sum");
    };
    let input = graph.shape(graph.node(node).input(0)).clone();
    Ok(single(graph.broadcast(delta, &input, &axes)?))
}

/// Pads the delta with zeros back to the input extent.
pub fn slice(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::Slice { lower, upper } = graph.op(node).clone() else {
        return unexpected("slice");
    };
    let input = graph.shape(graph.node(node).input(0)).clone();
    let above: Vec<usize> = input.iter().zip(&upper).map(|(&size, &end)| size - end).collect();
    let zero = scalar_zero(graph, delta);
    Ok(single(graph.pad(delta, zero, &lower, &above)?))
}

/// Only the padded data receives a delta; the fill value does not.
pub fn pad(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::Pad { below, .. } = graph.op(node).clone() else {
        return unexpected("pad");
    };
    let input = graph.shape(graph.node(node).input(0)).clone();
    let upper: Vec<usize> = below.iter().zip(&input).map(|(&start, &size)| start + size).collect();
    Ok(smallvec![Some(graph.slice(delta, &below, &upper)?.output(0)), None])
}

pub fn get_output_element(_graph: &mut Graph, _node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    Ok(single(incoming(deltas)?))
}

// =============================================================================
// Convolution and normalization
// =============================================================================

pub fn convolution(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let delta = incoming(deltas)?;
    let Op::Convolution(attrs) = graph.op(node).clone() else {
        return unexpected("convolution");
    };
    let (data, filters) = (graph.node(node).input(0), graph.node(node).input(1));
    let (data_shape, filters_shape) = (graph.shape(data).clone(), graph.shape(filters).clone());
    let d_data = graph.convolution_backprop_data(&data_shape, filters, delta, attrs.clone())?;
    let d_filters = graph.convolution_backprop_filters(data, &filters_shape, delta, attrs)?;
    Ok(pair(d_data, d_filters))
}

/// Gradient through the normalized output. Deltas reaching the mean and
/// variance outputs are not propagated.
pub fn batch_norm(graph: &mut Graph, node: NodeId, deltas: &[Option<Output>]) -> Result<Deltas> {
    let Op::BatchNorm { epsilon } = *graph.op(node) else {
        return unexpected("batch_norm");
    };
    let delta = match deltas.first().copied().flatten() {
        Some(delta) => delta,
        None => graph.zeros_like(node)?.output(0),
    };
    let bn = graph.node(node);
    let (gamma, beta, input) = (bn.input(0), bn.input(1), bn.input(2));
    let (mean, variance) = (node.output(1), node.output(2));
    let backprop = graph.batch_norm_backprop(epsilon, gamma, beta, input, mean, variance, delta)?;
    Ok(smallvec![Some(backprop.output(1)), Some(backprop.output(2)), Some(backprop.output(0))])
}
