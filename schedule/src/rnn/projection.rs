use std::collections::BTreeMap;

use graft_ir::pattern::predicate::LAYOUT;
use graft_ir::rewrite::{Application, Rejection};
use graft_ir::{BinaryOp, ConsumerIndex, Graph, NodeId, Op, OpKind, Output, PassReport, Pattern, Result, Transaction};

use super::ROW_BROADCAST;
use crate::pass::GraphPass;

/// `dot(reshape(slice(data)), weights) + broadcast(bias)`: the input
/// projection of one timestep.
fn step_projection() -> Pattern {
    let slice = Pattern::op(OpKind::Slice, vec![Pattern::label("data")]).named("slice");
    let step = Pattern::op(OpKind::Reshape, vec![slice]).with_predicate(LAYOUT);
    let dot = Pattern::op(OpKind::Dot, vec![step, Pattern::label("weights")]);
    let bias = Pattern::op(OpKind::Broadcast, vec![Pattern::label("bias")]).with_predicate(ROW_BROADCAST);
    Pattern::binary(BinaryOp::Add, dot, bias)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Operands {
    data: Output,
    weights: Output,
    bias: Output,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    root: NodeId,
    timestep: usize,
}

/// Timestep of a slice taking `data[t]` out of a `[steps, batch, features]`
/// sequence.
fn timestep(graph: &Graph, slice: NodeId) -> Option<usize> {
    let node = graph.node(slice);
    let Op::Slice { lower, upper } = node.op() else {
        return None;
    };
    let data = graph.shape(node.input(0));
    let &[_, batch, features] = data.as_slice() else {
        return None;
    };
    let t = lower[0];
    (lower.as_slice() == [t, 0, 0] && upper.as_slice() == [t + 1, batch, features]).then_some(t)
}

/// Batches the per-timestep input projections of a recurrent layer into one
/// `MatmulBias` over the whole sequence.
///
/// Projections are grouped by their data, weights and bias; groups of at
/// least `min_timesteps` members are fused. Each member is replaced by its
/// row block of the batched product.
#[derive(Debug, Clone)]
pub struct RnnMatFusion {
    min_timesteps: usize,
    pattern: Pattern,
}

impl RnnMatFusion {
    pub fn new(min_timesteps: usize) -> Result<Self> {
        let pattern = step_projection();
        pattern.validate()?;
        Ok(Self { min_timesteps: min_timesteps.max(1), pattern })
    }

    fn groups(&self, graph: &Graph) -> BTreeMap<Operands, Vec<Step>> {
        let mut groups: BTreeMap<Operands, Vec<Step>> = BTreeMap::new();
        for root in graph.toposort() {
            let Some(bindings) = self.pattern.match_first(graph, root.output(0)) else {
                continue;
            };
            let (Some(data), Some(weights), Some(bias), Some(slice)) =
                (bindings.get("data"), bindings.get("weights"), bindings.get("bias"), bindings.get("slice"))
            else {
                continue;
            };
            let Some(timestep) = timestep(graph, slice.node) else {
                continue;
            };
            groups.entry(Operands { data, weights, bias }).or_default().push(Step { root, timestep });
        }
        groups
    }
}

/// None of the fused operands may be computed from a projection the fusion
/// replaces.
fn independent(graph: &Graph, operands: &Operands, steps: &[Step]) -> bool {
    let ancestors = graph.toposort_from(&[operands.data, operands.weights, operands.bias]);
    !steps.iter().any(|step| ancestors.contains(&step.root))
}

fn fuse_group(graph: &mut Graph, consumers: &mut ConsumerIndex, operands: &Operands, steps: &[Step]) -> Result<usize> {
    let mut tx = Transaction::begin(graph);
    let sequence = graph.shape(operands.data).clone();
    let &[count, batch, features] = sequence.as_slice() else {
        return crate::fusion::unexpected("data");
    };

    let rows = graph.reshape(operands.data, &[0, 1, 2], &[count * batch, features])?;
    let product = graph.matmul_bias(rows, operands.weights, Some(operands.bias), false, false, &[0])?;
    let hidden = graph.shape(product)[1];
    let batched = graph.reshape(product, &[0, 1], &[count, batch, hidden])?;

    for step in steps {
        let t = step.timestep;
        let block = graph.slice(batched, &[t, 0, 0], &[t + 1, batch, hidden])?;
        let block = graph.reshape(block, &[0, 1, 2], &[batch, hidden])?;
        tx.retarget(step.root.output(0), block.output(0));
    }
    tx.commit(graph, consumers)
}

impl GraphPass for RnnMatFusion {
    fn name(&self) -> &str {
        "rnn_mat_fusion"
    }

    #[tracing::instrument(skip_all, fields(min_timesteps = self.min_timesteps))]
    fn run(&self, graph: &mut Graph) -> Result<PassReport> {
        let groups = self.groups(graph);
        let mut consumers = ConsumerIndex::build(graph);
        let mut report = PassReport::default();

        for (operands, steps) in &groups {
            if steps.len() < self.min_timesteps || !independent(graph, operands, steps) {
                continue;
            }
            let root = steps[0].root;
            match fuse_group(graph, &mut consumers, operands, steps) {
                Ok(pruned) => {
                    tracing::debug!(%root, timesteps = steps.len(), pruned, "input projections batched");
                    report.applied.push(Application { rule: "rnn_mat".to_string(), root });
                    report.pruned += pruned;
                }
                Err(error) if error.is_programming_error() => return Err(error),
                Err(error) => {
                    tracing::warn!(%root, %error, "projection batching rejected");
                    report.rejected.push(Rejection { rule: "rnn_mat".to_string(), root, error });
                }
            }
        }
        Ok(report)
    }
}
