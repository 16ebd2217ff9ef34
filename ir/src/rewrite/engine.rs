//! Single-sweep rewrite driver.
//!
//! # Algorithm
//!
//! 1. Order the live nodes topologically (reversed for consumers-first).
//! 2. Build the consumer index.
//! 3. For each node still live, try the rules in order. The first rule that
//!    matches, passes its refinement and builds a type-correct replacement
//!    is committed; the remaining rules are not tried on that node.
//!
//! Nodes created during the sweep are not visited. Running the pass again
//! is how callers reach further rewrites.

use crate::error::*;
use crate::graph::{ConsumerIndex, Graph, NodeId};
use crate::rewrite::{Rule, RuleMatch, Transaction};

/// Order in which a sweep visits nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    #[default]
    ProducersFirst,
    ConsumersFirst,
}

/// A committed rule application.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub rule: String,
    pub root: NodeId,
}

/// A match whose replacement was refused.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub rule: String,
    pub root: NodeId,
    pub error: Error,
}

/// Outcome of one or more sweeps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub applied: Vec<Application>,
    pub rejected: Vec<Rejection>,
    pub pruned: usize,
}

impl PassReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Applications of the rule named `rule`.
    pub fn count(&self, rule: &str) -> usize {
        self.applied.iter().filter(|a| a.rule == rule).count()
    }

    pub fn merge(&mut self, other: PassReport) {
        self.applied.extend(other.applied);
        self.rejected.extend(other.rejected);
        self.pruned += other.pruned;
    }
}

/// Sweeps `graph` once, applying the first matching rule at each live node.
///
/// A replacement whose types disagree with what it replaces is recorded in
/// [`PassReport::rejected`] and the sweep moves on. Errors that point at the
/// rules themselves (`MalformedPattern`, `ArityMismatch`) abort the pass.
#[tracing::instrument(skip_all, fields(rules = rules.len()))]
pub fn graph_rewrite(graph: &mut Graph, rules: &[Rule], traversal: Traversal) -> Result<PassReport> {
    let mut order = graph.toposort();
    if traversal == Traversal::ConsumersFirst {
        order.reverse();
    }
    let mut consumers = ConsumerIndex::build(graph);
    let mut report = PassReport::default();

    for root in order {
        if consumers.is_pruned(root) {
            continue;
        }
        for rule in rules {
            let Some(bindings) = rule.pattern().match_first(graph, root.output(0)) else {
                continue;
            };
            if !rule.refines(graph, &RuleMatch { root, bindings: &bindings, consumers: &consumers }) {
                tracing::trace!(rule = rule.name(), %root, "refinement declined");
                continue;
            }

            let tx = Transaction::begin(graph);
            match apply(graph, &mut consumers, rule, root, &bindings, tx) {
                Ok(pruned) => {
                    tracing::debug!(rule = rule.name(), %root, pruned, "rewrite applied");
                    report.applied.push(Application { rule: rule.name().to_string(), root });
                    report.pruned += pruned;
                    break;
                }
                Err(error) if error.is_programming_error() => return Err(error),
                Err(error) => {
                    tracing::warn!(rule = rule.name(), %root, %error, "rewrite rejected");
                    report.rejected.push(Rejection { rule: rule.name().to_string(), root, error });
                }
            }
        }
    }

    tracing::debug!(applied = report.applied.len(), rejected = report.rejected.len(), "rewrite complete");
    Ok(report)
}

fn apply(
    graph: &mut Graph,
    consumers: &mut ConsumerIndex,
    rule: &Rule,
    root: NodeId,
    bindings: &crate::pattern::Bindings,
    mut tx: Transaction,
) -> Result<usize> {
    let replacement = rule.build(graph, &RuleMatch { root, bindings, consumers })?;
    for (old, new) in replacement.pairs(graph, root)? {
        tx.retarget(old, new);
    }
    tx.commit(graph, consumers)
}
