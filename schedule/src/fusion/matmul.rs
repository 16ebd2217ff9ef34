use graft_ir::pattern::predicate::{TRANSPOSE, is_transpose};
use graft_ir::{BinaryOp, Graph, NodePredicate, Op, OpKind, Output, Pattern, Replacement, Result, Rule, RuleMatch};

use super::unexpected;

fn is_operand(graph: &Graph, output: Output) -> bool {
    !is_transpose(graph, output)
}

const OPERAND: NodePredicate = NodePredicate::new("operand", is_operand);

/// `dot(a, b)` where either operand may hide behind a chain of transposes.
fn dot_through_transposes() -> Pattern {
    Pattern::op(
        OpKind::Dot,
        vec![
            Pattern::skip_if(TRANSPOSE, Pattern::label("a").with_predicate(OPERAND)),
            Pattern::skip_if(TRANSPOSE, Pattern::label("b").with_predicate(OPERAND)),
        ],
    )
    .named("dot")
}

fn broadcast_bias() -> Pattern {
    Pattern::op(OpKind::Broadcast, vec![Pattern::label("bias")]).named("broadcast")
}

/// Odd number of transposes on the single-input path from `from` down to `to`.
fn transposed(graph: &Graph, mut from: Output, to: Output) -> bool {
    let mut odd = false;
    while from != to && is_transpose(graph, from) {
        odd = !odd;
        from = graph.node(from.node).input(0);
    }
    odd
}

struct DotOperands {
    a: Output,
    b: Output,
    transpose_a: bool,
    transpose_b: bool,
}

fn dot_operands(graph: &Graph, m: &RuleMatch<'_>) -> Result<DotOperands> {
    let dot = graph.node(m.node("dot")?);
    let (a, b) = (m.output("a")?, m.output("b")?);
    Ok(DotOperands { a, b, transpose_a: transposed(graph, dot.input(0), a), transpose_b: transposed(graph, dot.input(1), b) })
}

fn broadcast_axes(graph: &Graph, m: &RuleMatch<'_>) -> Result<graft_ir::Axes> {
    match graph.op(m.node("broadcast")?) {
        Op::Broadcast { axes } => Ok(axes.clone()),
        _ => unexpected("broadcast"),
    }
}

pub(super) fn matmul(name: &'static str) -> Result<Rule> {
    fn absorbs_transpose(graph: &Graph, m: &RuleMatch<'_>) -> bool {
        let (Ok(dot), Ok(a), Ok(b)) = (m.node("dot"), m.output("a"), m.output("b")) else {
            return false;
        };
        let dot = graph.node(dot);
        dot.input(0) != a || dot.input(1) != b
    }

    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let ops = dot_operands(graph, m)?;
        let fused = graph.matmul_bias(ops.a, ops.b, None, ops.transpose_a, ops.transpose_b, &[])?;
        Ok(Replacement::node(fused))
    }

    Ok(Rule::new(name, dot_through_transposes(), &["dot", "a", "b"], build)?.with_refinement(absorbs_transpose))
}

pub(super) fn matmul_bias(name: &'static str) -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let ops = dot_operands(graph, m)?;
        let axes = broadcast_axes(graph, m)?;
        let bias = m.output("bias")?;
        let fused = graph.matmul_bias(ops.a, ops.b, Some(bias), ops.transpose_a, ops.transpose_b, &axes)?;
        Ok(Replacement::node(fused))
    }

    let pattern = Pattern::binary(BinaryOp::Add, dot_through_transposes(), broadcast_bias());
    Rule::new(name, pattern, &["dot", "a", "b", "bias", "broadcast"], build)
}

pub(super) fn matmul_bias_chain(name: &'static str) -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let &Op::MatmulBias { transpose_a, transpose_b, .. } = graph.op(m.node("matmul")?) else {
            return unexpected("matmul");
        };
        let axes = broadcast_axes(graph, m)?;
        let (a, b, bias) = (m.output("a")?, m.output("b")?, m.output("bias")?);
        let fused = graph.matmul_bias(a, b, Some(bias), transpose_a, transpose_b, &axes)?;
        Ok(Replacement::node(fused))
    }

    // Two sources: only a bias-free MatmulBias takes another bias.
    let matmul = Pattern::op(OpKind::MatmulBias, vec![Pattern::label("a"), Pattern::label("b")]).named("matmul");
    let pattern = Pattern::binary(BinaryOp::Add, matmul, broadcast_bias());
    Rule::new(name, pattern, &["matmul", "a", "b", "bias", "broadcast"], build)
}
