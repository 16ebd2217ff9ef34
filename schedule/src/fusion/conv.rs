use graft_ir::pattern::predicate::{PERMUTATION, ZERO};
use graft_ir::shape::permute;
use graft_ir::{BinaryOp, ConvAttrs, Graph, Op, OpKind, Pattern, Replacement, Result, Rule, RuleMatch, UnaryOp};

use super::{has_single_use, unexpected};

fn conv_attrs(graph: &Graph, m: &RuleMatch<'_>) -> Result<ConvAttrs> {
    match graph.op(m.node("conv")?) {
        Op::Convolution(attrs) | Op::ConvolutionBias(attrs) | Op::ConvolutionBackpropFilters { attrs, .. } => {
            Ok(attrs.clone())
        }
        _ => unexpected("conv"),
    }
}

fn convolution(src: Vec<Pattern>) -> Pattern {
    Pattern::op(OpKind::Convolution, src).named("conv")
}

fn conv_has_single_use(graph: &Graph, m: &RuleMatch<'_>) -> bool {
    m.output("conv").is_ok_and(|conv| has_single_use(graph, m, conv))
}

pub(super) fn convolution_bias(name: &'static str) -> Result<Rule> {
    /// Bias broadcast over every axis but the channel axis.
    fn per_channel(graph: &Graph, m: &RuleMatch<'_>) -> bool {
        let Ok(broadcast) = m.node("broadcast") else {
            return false;
        };
        let rank = graph.node(broadcast).shape().len();
        matches!(graph.op(broadcast), Op::Broadcast { axes }
            if axes.iter().copied().eq((0..rank).filter(|&axis| axis != 1)))
    }

    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let attrs = conv_attrs(graph, m)?;
        let fused = graph.convolution_bias(m.output("data")?, m.output("filters")?, m.output("bias")?, attrs)?;
        Ok(Replacement::node(fused))
    }

    let conv = convolution(vec![Pattern::label("data"), Pattern::label("filters")]);
    let broadcast = Pattern::op(OpKind::Broadcast, vec![Pattern::label("bias")]).named("broadcast");
    let pattern = Pattern::binary(BinaryOp::Add, conv, broadcast);
    Ok(Rule::new(name, pattern, &["conv", "data", "filters", "bias", "broadcast"], build)?.with_refinement(per_channel))
}

pub(super) fn convolution_bias_relu(name: &'static str) -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let attrs = conv_attrs(graph, m)?;
        let fused = graph.convolution_bias_relu(m.output("data")?, m.output("filters")?, m.output("bias")?, attrs)?;
        Ok(Replacement::node(fused))
    }

    let conv = Pattern::op(
        OpKind::ConvolutionBias,
        vec![Pattern::label("data"), Pattern::label("filters"), Pattern::label("bias")],
    )
    .named("conv");
    let pattern = Pattern::unary(UnaryOp::Relu, conv);
    Ok(Rule::new(name, pattern, &["conv", "data", "filters", "bias"], build)?.with_refinement(conv_has_single_use))
}

pub(super) fn convolution_relu(name: &'static str) -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let attrs = conv_attrs(graph, m)?;
        Ok(Replacement::node(graph.convolution_relu(m.output("data")?, m.output("filters")?, attrs)?))
    }

    let pattern = Pattern::unary(UnaryOp::Relu, convolution(vec![Pattern::label("data"), Pattern::label("filters")]));
    Ok(Rule::new(name, pattern, &["conv", "data", "filters"], build)?.with_refinement(conv_has_single_use))
}

/// `pad(data, 0)`; the pad node is bound as `pad`.
fn zero_pad() -> Pattern {
    Pattern::op(OpKind::Pad, vec![Pattern::label("data"), Pattern::label("pad_value").with_predicate(ZERO)]).named("pad")
}

fn pad_widths(graph: &Graph, m: &RuleMatch<'_>) -> Option<(graft_ir::Shape, graft_ir::Shape)> {
    match graph.op(m.node("pad").ok()?) {
        Op::Pad { below, above } => Some((below.clone(), above.clone())),
        _ => None,
    }
}

/// Adds the pad widths of data axes `axes[2..]` to the convolution padding.
fn fold_padding(graph: &Graph, m: &RuleMatch<'_>, axes: &[usize]) -> Result<ConvAttrs> {
    let mut attrs = conv_attrs(graph, m)?;
    let Some((below, above)) = pad_widths(graph, m) else {
        return unexpected("pad");
    };
    for (i, &axis) in axes.iter().skip(2).enumerate() {
        attrs.padding_below[i] += below[axis];
        attrs.padding_above[i] += above[axis];
    }
    Ok(attrs)
}

/// Batch and channel axes (`axes[0]`, `axes[1]`) must be unpadded.
fn spatial_only(graph: &Graph, m: &RuleMatch<'_>, axes: &[usize]) -> bool {
    pad_widths(graph, m).is_some_and(|(below, above)| axes.iter().take(2).all(|&a| below[a] == 0 && above[a] == 0))
}

fn reshape_order(graph: &Graph, m: &RuleMatch<'_>) -> Option<graft_ir::Axes> {
    match graph.op(m.node("reshape").ok()?) {
        Op::Reshape { input_order } => Some(input_order.clone()),
        _ => None,
    }
}

/// The pad leaves batch and channel axes of `data` alone.
fn pads_spatial_axes_only(graph: &Graph, m: &RuleMatch<'_>) -> bool {
    let rank = m.output("data").map_or(0, |data| graph.shape(data).len());
    spatial_only(graph, m, &graft_ir::shape::identity_order(rank))
}

pub(super) fn zero_padded(name: &'static str) -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let data = m.output("data")?;
        let attrs = fold_padding(graph, m, &graft_ir::shape::identity_order(graph.shape(data).len()))?;
        Ok(Replacement::node(graph.convolution(data, m.output("filters")?, attrs)?))
    }

    let pattern = convolution(vec![zero_pad(), Pattern::label("filters")]);
    Ok(Rule::new(name, pattern, &["conv", "pad", "data", "filters"], build)?.with_refinement(pads_spatial_axes_only))
}

pub(super) fn zero_padded_backprop_filters(name: &'static str) -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let Op::ConvolutionBackpropFilters { filters_shape, .. } = graph.op(m.node("conv")?) else {
            return unexpected("conv");
        };
        let filters_shape = filters_shape.clone();
        let data = m.output("data")?;
        let attrs = fold_padding(graph, m, &graft_ir::shape::identity_order(graph.shape(data).len()))?;
        let fused = graph.convolution_backprop_filters(data, &filters_shape, m.output("delta")?, attrs)?;
        Ok(Replacement::node(fused))
    }

    let pattern =
        Pattern::op(OpKind::ConvolutionBackpropFilters, vec![zero_pad(), Pattern::label("delta")]).named("conv");
    Ok(Rule::new(name, pattern, &["conv", "pad", "data", "delta"], build)?.with_refinement(pads_spatial_axes_only))
}

pub(super) fn zero_padded_reshaped(name: &'static str) -> Result<Rule> {
    fn refine(graph: &Graph, m: &RuleMatch<'_>) -> bool {
        reshape_order(graph, m).is_some_and(|order| spatial_only(graph, m, &order))
    }

    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let Some(order) = reshape_order(graph, m) else {
            return unexpected("reshape");
        };
        let data = m.output("data")?;
        let attrs = fold_padding(graph, m, &order)?;
        let shape = permute(graph.shape(data), &order);
        let permuted = graph.reshape(data, &order, &shape)?;
        Ok(Replacement::node(graph.convolution(permuted, m.output("filters")?, attrs)?))
    }

    let reshape = Pattern::op(OpKind::Reshape, vec![zero_pad()]).named("reshape").with_predicate(PERMUTATION);
    let pattern = convolution(vec![reshape, Pattern::label("filters")]);
    Ok(Rule::new(name, pattern, &["conv", "pad", "reshape", "data", "filters"], build)?.with_refinement(refine))
}
