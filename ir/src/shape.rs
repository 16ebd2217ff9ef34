//! Shape inference utilities.
//!
//! Every typed constructor on [`Graph`](crate::Graph) funnels through one of
//! these functions before a node is created.

use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;
use crate::types::ConvAttrs;

/// Concrete tensor shape.
pub type Shape = SmallVec<[usize; 4]>;

/// Axis list or permutation.
pub type Axes = SmallVec<[usize; 4]>;

pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

pub fn identity_order(rank: usize) -> Axes {
    (0..rank).collect()
}

pub fn is_identity_order(order: &[usize]) -> bool {
    order.iter().enumerate().all(|(i, &axis)| i == axis)
}

pub fn is_permutation(order: &[usize], rank: usize) -> bool {
    let mut seen: SmallVec<[bool; 8]> = SmallVec::from_elem(false, rank);
    order.len() == rank
        && order.iter().all(|&axis| axis < rank && !std::mem::replace(&mut seen[axis], true))
}

pub fn inverse_permutation(order: &[usize]) -> Axes {
    let mut inverse: Axes = SmallVec::from_elem(0, order.len());
    for (i, &axis) in order.iter().enumerate() {
        inverse[axis] = i;
    }
    inverse
}

pub fn permute(shape: &[usize], order: &[usize]) -> Shape {
    order.iter().map(|&axis| shape[axis]).collect()
}

/// Checks that `axes` are strictly increasing and below `rank`.
pub fn validate_axes(axes: &[usize], rank: usize) -> Result<()> {
    let sorted = axes.windows(2).all(|w| w[0] < w[1]);
    ensure!(sorted && axes.iter().all(|&a| a < rank), InvalidAxesSnafu { axes: axes.to_vec(), rank });
    Ok(())
}

/// Shape left after removing `axes`.
pub fn remove_axes(shape: &[usize], axes: &[usize]) -> Result<Shape> {
    validate_axes(axes, shape.len())?;
    Ok(shape.iter().enumerate().filter(|(i, _)| !axes.contains(i)).map(|(_, &d)| d).collect())
}

pub fn reshape(input: &[usize], input_order: &[usize], output: &[usize]) -> Result<()> {
    ensure!(
        is_permutation(input_order, input.len()),
        InvalidPermutationSnafu { permutation: input_order.to_vec(), rank: input.len() }
    );
    ensure!(numel(input) == numel(output), ReshapeSizeSnafu { input: numel(input), output: numel(output) });
    Ok(())
}

/// Input shape a broadcast to `output` along `axes` must have.
pub fn broadcast_source(output: &[usize], axes: &[usize]) -> Result<Shape> {
    remove_axes(output, axes)
}

pub fn dot(lhs: &[usize], rhs: &[usize]) -> Result<Shape> {
    ensure!(lhs.len() == 2 && rhs.len() == 2 && lhs[1] == rhs[0], DotShapeSnafu { lhs, rhs });
    Ok(Shape::from_slice(&[lhs[0], rhs[1]]))
}

/// `dot` of optionally transposed rank-2 operands.
pub fn matmul(lhs: &[usize], rhs: &[usize], transpose_lhs: bool, transpose_rhs: bool) -> Result<Shape> {
    ensure!(lhs.len() == 2 && rhs.len() == 2, DotShapeSnafu { lhs, rhs });
    let lhs_eff = if transpose_lhs { permute(lhs, &[1, 0]) } else { Shape::from_slice(lhs) };
    let rhs_eff = if transpose_rhs { permute(rhs, &[1, 0]) } else { Shape::from_slice(rhs) };
    dot(&lhs_eff, &rhs_eff)
}

pub fn pad(input: &[usize], below: &[usize], above: &[usize]) -> Result<Shape> {
    let rank = input.len();
    ensure!(below.len() == rank, RankMismatchSnafu { context: "pad below", expected: rank, actual: below.len() });
    ensure!(above.len() == rank, RankMismatchSnafu { context: "pad above", expected: rank, actual: above.len() });
    Ok(input.iter().zip(below).zip(above).map(|((&d, &b), &a)| d + b + a).collect())
}

pub fn slice(input: &[usize], lower: &[usize], upper: &[usize]) -> Result<Shape> {
    let rank = input.len();
    ensure!(lower.len() == rank, RankMismatchSnafu { context: "slice lower", expected: rank, actual: lower.len() });
    ensure!(upper.len() == rank, RankMismatchSnafu { context: "slice upper", expected: rank, actual: upper.len() });
    for (dim, ((&size, &lo), &hi)) in input.iter().zip(lower).zip(upper).enumerate() {
        ensure!(lo <= hi && hi <= size, SliceBoundsSnafu { dim, lower: lo, upper: hi, size });
    }
    Ok(lower.iter().zip(upper).map(|(&lo, &hi)| hi - lo).collect())
}

/// Output shape of a convolution of `data` `[N, C_in, d...]` with `filters` `[C_out, C_in, k...]`.
pub fn convolution(data: &[usize], filters: &[usize], attrs: &ConvAttrs) -> Result<Shape> {
    let rank = data.len();
    ensure!(rank >= 3, RankMismatchSnafu { context: "convolution data", expected: 3usize, actual: rank });
    ensure!(
        filters.len() == rank,
        RankMismatchSnafu { context: "convolution filters", expected: rank, actual: filters.len() }
    );
    let spatial = rank - 2;
    let lengths = [attrs.strides.len(), attrs.dilations.len(), attrs.padding_below.len(), attrs.padding_above.len()];
    ensure!(
        lengths.iter().all(|&len| len == spatial),
        ConvolutionShapeSnafu { reason: format!("window attributes {lengths:?} do not match spatial rank {spatial}") }
    );
    ensure!(
        data[1] == filters[1],
        ConvolutionShapeSnafu { reason: format!("data has {} channels, filters expect {}", data[1], filters[1]) }
    );

    let mut out = Shape::from_slice(&[data[0], filters[0]]);
    for i in 0..spatial {
        ensure!(
            attrs.strides[i] > 0 && attrs.dilations[i] > 0,
            ConvolutionShapeSnafu { reason: format!("axis {i} has zero stride or dilation") }
        );
        let padded = data[i + 2] + attrs.padding_below[i] + attrs.padding_above[i];
        let window = (filters[i + 2].max(1) - 1) * attrs.dilations[i] + 1;
        ensure!(
            filters[i + 2] > 0 && padded >= window,
            ConvolutionShapeSnafu { reason: format!("axis {i}: window {window} exceeds padded extent {padded}") }
        );
        out.push((padded - window) / attrs.strides[i] + 1);
    }
    Ok(out)
}
