//! Reshape elimination.
//!
//! Removes reshapes that do nothing and collapses adjacent ones, so fusion
//! sees plain producers. Two reshapes compose when the outer one keeps axis
//! order (it only regroups) or when both are pure axis permutations.

use graft_ir::pattern::predicate::is_permutation_reshape;
use graft_ir::rewrite::{Traversal, graph_rewrite};
use graft_ir::shape::{Axes, is_identity_order};
use graft_ir::{Graph, Op, OpKind, Output, PassReport, Pattern, Replacement, Result, Rule, RuleMatch};

use crate::fusion::unexpected;
use crate::pass::GraphPass;

fn input_order(graph: &Graph, id: graft_ir::NodeId) -> Option<&Axes> {
    match graph.op(id) {
        Op::Reshape { input_order } => Some(input_order),
        _ => None,
    }
}

/// Identity order and unchanged shape.
fn is_noop(graph: &Graph, output: Output) -> bool {
    let node = graph.node(output.node);
    input_order(graph, output.node).is_some_and(|order| is_identity_order(order))
        && graph.shape(node.input(0)) == node.shape()
}

fn identity_reshape() -> Result<Rule> {
    fn refine(graph: &Graph, m: &RuleMatch<'_>) -> bool {
        is_noop(graph, m.root.output(0))
    }

    fn build(_: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        Ok(Replacement::output(m.output("x")?))
    }

    let pattern = Pattern::op(OpKind::Reshape, vec![Pattern::label("x")]);
    Ok(Rule::new("identity_reshape", pattern, &["x"], build)?.with_refinement(refine))
}

/// Single order equivalent to applying `inner` and then `outer`, if the two
/// compose.
fn compose(graph: &Graph, inner: Output, outer: Output) -> Option<Axes> {
    let inner_order = input_order(graph, inner.node)?;
    let outer_order = input_order(graph, outer.node)?;
    if is_identity_order(outer_order) {
        return Some(inner_order.clone());
    }
    if is_permutation_reshape(graph, inner) && is_permutation_reshape(graph, outer) {
        return Some(outer_order.iter().map(|&axis| inner_order[axis]).collect());
    }
    None
}

fn reshape_of_reshape() -> Result<Rule> {
    fn refine(graph: &Graph, m: &RuleMatch<'_>) -> bool {
        m.output("inner").is_ok_and(|inner| compose(graph, inner, m.root.output(0)).is_some())
    }

    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let (x, inner) = (m.output("x")?, m.output("inner")?);
        let Some(order) = compose(graph, inner, m.root.output(0)) else {
            return unexpected("inner");
        };
        let shape = graph.node(m.root).shape().clone();
        if is_identity_order(&order) && *graph.shape(x) == shape {
            return Ok(Replacement::output(x));
        }
        Ok(Replacement::node(graph.reshape(x, &order, &shape)?))
    }

    let inner = Pattern::op(OpKind::Reshape, vec![Pattern::label("x")]).named("inner");
    let pattern = Pattern::op(OpKind::Reshape, vec![inner]);
    Ok(Rule::new("reshape_of_reshape", pattern, &["x", "inner"], build)?.with_refinement(refine))
}

/// Identity reshapes removed, adjacent reshapes collapsed, permutations that
/// cancel dropped.
#[derive(Debug, Clone)]
pub struct ReshapeElimination {
    rules: Vec<Rule>,
}

impl ReshapeElimination {
    pub fn new() -> Result<Self> {
        Ok(Self { rules: vec![identity_reshape()?, reshape_of_reshape()?] })
    }
}

impl GraphPass for ReshapeElimination {
    fn name(&self) -> &str {
        "reshape_elimination"
    }

    #[tracing::instrument(skip_all)]
    fn run(&self, graph: &mut Graph) -> Result<PassReport> {
        graph_rewrite(graph, &self.rules, Traversal::ProducersFirst)
    }
}
