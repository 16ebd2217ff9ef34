use std::collections::HashMap;

use smallvec::SmallVec;

use graft_ir::rewrite::{Application, Rejection};
use graft_ir::{ConsumerIndex, Graph, NodeId, Op, Output, PassReport, Result, Transaction};

use crate::pass::GraphPass;

/// Folds chains of `Lstm` cells into one `Rnn` node.
///
/// Cell `b` follows cell `a` when `b` reads `a`'s hidden and cell state and
/// both read the same layer weights, recurrent weights and bias. A cell with
/// more than one follower ends its chain. Chains shorter than
/// `min_timesteps` are left alone.
#[derive(Debug, Clone)]
pub struct RnnFusion {
    min_timesteps: usize,
}

impl RnnFusion {
    pub fn new(min_timesteps: usize) -> Self {
        Self { min_timesteps: min_timesteps.max(1) }
    }

    pub fn min_timesteps(&self) -> usize {
        self.min_timesteps
    }
}

/// Previous cell in the same layer, if `cell` continues one.
fn predecessor(graph: &Graph, cell: NodeId) -> Option<NodeId> {
    let node = graph.node(cell);
    let (h, c) = (node.input(1), node.input(2));
    if h.node != c.node || h.slot != 0 || c.slot != 1 {
        return None;
    }
    let prev = graph.node(h.node);
    (matches!(prev.op(), Op::Lstm) && prev.inputs()[3..] == node.inputs()[3..]).then_some(h.node)
}

/// Every live node that reads `head`, directly or not, `head` included.
fn downstream(graph: &Graph, order: &[NodeId], head: NodeId) -> Vec<bool> {
    let mut marked = vec![false; graph.len()];
    marked[head.index()] = true;
    for &id in order {
        if graph.node(id).inputs().iter().any(|i| marked[i.node.index()]) {
            marked[id.index()] = true;
        }
    }
    marked
}

/// Chains in topological order of their heads.
fn chains(graph: &Graph, order: &[NodeId]) -> Vec<Vec<NodeId>> {
    let cells: Vec<NodeId> = order.iter().copied().filter(|&id| matches!(graph.op(id), Op::Lstm)).collect();

    let mut followers: HashMap<NodeId, SmallVec<[NodeId; 2]>> = HashMap::new();
    for &cell in &cells {
        if let Some(prev) = predecessor(graph, cell) {
            followers.entry(prev).or_default().push(cell);
        }
    }
    let next = |cell: NodeId| match followers.get(&cell).map(SmallVec::as_slice) {
        Some(&[only]) => Some(only),
        _ => None,
    };
    let continues = |cell: NodeId| predecessor(graph, cell).is_some_and(|prev| next(prev) == Some(cell));

    let mut result = Vec::new();
    for &head in cells.iter().filter(|&&cell| !continues(cell)) {
        let mut chain = vec![head];
        let mut cell = head;
        while let Some(following) = next(cell) {
            chain.push(following);
            cell = following;
        }

        // Every sequence element becomes an input of the fused node, so none
        // may be computed from the chain itself. Split where one is.
        while !chain.is_empty() {
            let marked = downstream(graph, order, chain[0]);
            let valid = chain.iter().take_while(|&&cell| !marked[graph.node(cell).input(0).node.index()]).count();
            let rest = chain.split_off(valid.max(1));
            result.push(std::mem::replace(&mut chain, rest));
        }
    }
    result
}

fn fuse_chain(graph: &mut Graph, consumers: &mut ConsumerIndex, chain: &[NodeId]) -> Result<usize> {
    let mut tx = Transaction::begin(graph);
    let head = graph.node(chain[0]);
    let (h0, c0) = (head.input(1), head.input(2));
    let (w_layer, w_iter, bias) = (head.input(3), head.input(4), head.input(5));
    let xs: SmallVec<[Output; 8]> = chain.iter().map(|&cell| graph.node(cell).input(0)).collect();

    let rnn = graph.rnn(w_layer, w_iter, bias, h0, c0, &xs)?;
    let steps = chain.len();
    for (t, &cell) in chain.iter().enumerate() {
        tx.retarget(cell.output(0), rnn.output(t));
        tx.retarget(cell.output(1), rnn.output(steps + t));
    }
    tx.commit(graph, consumers)
}

impl GraphPass for RnnFusion {
    fn name(&self) -> &str {
        "rnn_fusion"
    }

    #[tracing::instrument(skip_all, fields(min_timesteps = self.min_timesteps))]
    fn run(&self, graph: &mut Graph) -> Result<PassReport> {
        let order = graph.toposort();
        let mut consumers = ConsumerIndex::build(graph);
        let mut report = PassReport::default();

        for chain in chains(graph, &order) {
            if chain.len() < self.min_timesteps {
                tracing::trace!(head = %chain[0], cells = chain.len(), "chain too short");
                continue;
            }
            let root = chain[0];
            match fuse_chain(graph, &mut consumers, &chain) {
                Ok(pruned) => {
                    tracing::debug!(%root, timesteps = chain.len(), pruned, "rnn fused");
                    report.applied.push(Application { rule: "rnn".to_string(), root });
                    report.pruned += pruned;
                }
                Err(error) if error.is_programming_error() => return Err(error),
                Err(error) => {
                    tracing::warn!(%root, %error, "rnn fusion rejected");
                    report.rejected.push(Rejection { rule: "rnn".to_string(), root, error });
                }
            }
        }
        Ok(report)
    }
}
