use graft_ir::pattern::predicate::ONE;
use graft_ir::{Activation, BinaryOp, Graph, Op, OpKey, OpKind, Output, Pattern, Replacement, Result, Rule, RuleMatch, UnaryOp};

use super::{has_single_use, unexpected};

pub(super) fn sigmoid(name: &'static str) -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        Ok(Replacement::node(graph.sigmoid(m.output("x")?)?))
    }

    let denominator = Pattern::binary(
        BinaryOp::Add,
        Pattern::label("one").with_predicate(ONE),
        Pattern::unary(UnaryOp::Exp, Pattern::unary(UnaryOp::Neg, Pattern::label("x"))),
    );
    let pattern = Pattern::binary(BinaryOp::Div, Pattern::label("numerator").with_predicate(ONE), denominator);
    Rule::new(name, pattern, &["x"], build)
}

/// `delta * e / ((e + 1) * (e + 1))` with `e = exp(-x)` → `SigmoidBackprop`.
pub(super) fn sigmoid_backprop(name: &'static str) -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        Ok(Replacement::node(graph.sigmoid_backprop(m.output("x")?, m.output("delta")?)?))
    }

    let exp_neg = || Pattern::unary(UnaryOp::Exp, Pattern::unary(UnaryOp::Neg, Pattern::label("x"))).named("exp");
    let denominator =
        || Pattern::binary(BinaryOp::Add, exp_neg(), Pattern::label("one").with_predicate(ONE)).named("denominator");
    let numerator = Pattern::binary(BinaryOp::Mul, Pattern::label("delta"), exp_neg());
    let squared = Pattern::binary(BinaryOp::Mul, denominator(), denominator());
    let pattern = Pattern::binary(BinaryOp::Div, numerator, squared);
    Rule::new(name, pattern, &["x", "delta"], build)
}

fn activation(graph: &Graph, output: Output) -> Option<Activation> {
    match graph.op(output.node) {
        Op::Unary(UnaryOp::Sigmoid) => Some(Activation::Logistic),
        Op::Unary(UnaryOp::Tanh) => Some(Activation::Tanh),
        _ => None,
    }
}

pub(super) fn sigmoid_multiply(name: &'static str) -> Result<Rule> {
    /// At least one logistic operand, and neither activation shared.
    fn refine(graph: &Graph, m: &RuleMatch<'_>) -> bool {
        let (Ok(lhs), Ok(rhs)) = (m.output("lhs"), m.output("rhs")) else {
            return false;
        };
        let logistic = [lhs, rhs].iter().any(|&o| activation(graph, o) == Some(Activation::Logistic));
        logistic && lhs != rhs && has_single_use(graph, m, lhs) && has_single_use(graph, m, rhs)
    }

    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let (lhs, rhs) = (m.output("lhs")?, m.output("rhs")?);
        let (Some(a), Some(b)) = (activation(graph, lhs), activation(graph, rhs)) else {
            return unexpected("lhs");
        };
        Ok(Replacement::node(graph.sigmoid_multiply(m.output("x")?, m.output("y")?, [a, b])?))
    }

    let act = |label: &str, input: &str| {
        Pattern::ops([OpKey::from(UnaryOp::Sigmoid), OpKey::from(UnaryOp::Tanh)], vec![Pattern::label(input)]).named(label)
    };
    let pattern = Pattern::binary(BinaryOp::Mul, act("lhs", "x"), act("rhs", "y"));
    Ok(Rule::new(name, pattern, &["lhs", "rhs", "x", "y"], build)?.with_refinement(refine))
}

pub(super) fn batch_norm_relu(name: &'static str) -> Result<Rule> {
    /// The normalized output feeds nothing but the relu, so the unfused
    /// values never need to exist.
    fn refine(graph: &Graph, m: &RuleMatch<'_>) -> bool {
        let Ok(bn) = m.node("bn") else {
            return false;
        };
        let normalized = bn.output(0);
        match m.output("select") {
            Ok(select) => has_single_use(graph, m, normalized) && has_single_use(graph, m, select),
            Err(_) => has_single_use(graph, m, normalized),
        }
    }

    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let bn = m.node("bn")?;
        let &Op::BatchNorm { epsilon } = graph.op(bn) else {
            return unexpected("bn");
        };
        let fused = graph.batch_norm_relu(epsilon, m.output("gamma")?, m.output("beta")?, m.output("input")?)?;
        Ok(Replacement::output(fused.output(0))
            .also(bn.output(1), fused.output(1))
            .also(bn.output(2), fused.output(2)))
    }

    let batch_norm = || {
        Pattern::op(OpKind::BatchNorm, vec![Pattern::label("gamma"), Pattern::label("beta"), Pattern::label("input")])
            .at_slot(0)
            .named("bn")
    };
    let normalized = Pattern::any(vec![
        Pattern::op(OpKind::GetOutputElement, vec![batch_norm()]).named("select"),
        batch_norm(),
    ]);
    let pattern = Pattern::unary(UnaryOp::Relu, normalized);
    Ok(Rule::new(name, pattern, &["bn", "gamma", "beta", "input"], build)?.with_refinement(refine))
}
