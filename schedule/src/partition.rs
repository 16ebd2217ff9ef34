//! Loop-kernel partitioning.
//!
//! Groups connected elementwise nodes of one shape into kernels that a code
//! generator can emit as a single loop. One topological pass: a fusable node
//! joins the groups of its fusable producers (merging them if there are
//! several) or starts its own.
//!
//! Merging does not check that the merged group stays convex; a path that
//! leaves a group through a non-fusable node and re-enters it is possible.

use std::collections::HashSet;

use bon::bon;
use smallvec::SmallVec;

use graft_ir::{ConsumerIndex, Graph, NodeId, Output, Shape};

use crate::config::PipelineConfig;

/// Decides which nodes may join a loop kernel.
pub type FusablePredicate = fn(&Graph, NodeId) -> bool;

/// Elementwise unary or binary node whose inputs all have its output type.
pub fn is_fusable(graph: &Graph, id: NodeId) -> bool {
    let node = graph.node(id);
    node.op().is_elementwise()
        && node.outputs().len() == 1
        && node.inputs().iter().all(|&input| graph.output_type(input).is_ok_and(|ty| ty == node.output_type(0)))
}

/// One group of fused nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopKernel {
    /// Member visited first.
    pub leader: NodeId,
    /// A member's in-group producers come before it.
    pub members: Vec<NodeId>,
    /// Iteration shape shared by every member.
    pub shape: Shape,
    /// Values read from outside the kernel, in first-use order.
    pub inputs: Vec<Output>,
    /// Member outputs read outside the kernel or returned by the graph.
    pub outputs: Vec<Output>,
}

impl LoopKernel {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }
}

/// Union-find over group elements, numbered in visiting order.
///
/// Each root owns the ordered member list and the leader of its group. The
/// leader is the smallest element, so comparing elements compares
/// topological positions.
#[derive(Debug, Default)]
struct Groups {
    parent: Vec<usize>,
    size: Vec<usize>,
    leader: Vec<usize>,
    members: Vec<Vec<NodeId>>,
}

impl Groups {
    fn push(&mut self, id: NodeId) -> usize {
        let element = self.parent.len();
        self.parent.push(element);
        self.size.push(1);
        self.leader.push(element);
        self.members.push(vec![id]);
        element
    }

    fn find(&mut self, element: usize) -> usize {
        let mut root = element;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = element;
        while self.parent[current] != root {
            current = std::mem::replace(&mut self.parent[current], root);
        }
        root
    }

    /// Joins two roots; `first`'s members stay ahead of `second`'s.
    fn union(&mut self, first: usize, second: usize) -> usize {
        if first == second {
            return first;
        }
        let (root, child) = if self.size[first] >= self.size[second] { (first, second) } else { (second, first) };
        self.parent[child] = root;
        self.size[root] += self.size[child];
        self.leader[root] = self.leader[first].min(self.leader[second]);

        let mut members = std::mem::take(&mut self.members[first]);
        members.append(&mut self.members[second]);
        self.members[root] = members;
        root
    }
}

/// Partitions a graph into [`LoopKernel`]s.
#[derive(Debug, Clone)]
pub struct LoopKernelCollector {
    min_fuse_size: usize,
    predicate: FusablePredicate,
}

#[bon]
impl LoopKernelCollector {
    #[builder]
    pub fn new(
        #[builder(default = 3)] min_fuse_size: usize,
        #[builder(default = is_fusable as FusablePredicate)] predicate: FusablePredicate,
    ) -> Self {
        Self { min_fuse_size, predicate }
    }
}

impl Default for LoopKernelCollector {
    fn default() -> Self {
        Self { min_fuse_size: 3, predicate: is_fusable }
    }
}

impl LoopKernelCollector {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self { min_fuse_size: config.min_fuse_size, ..Self::default() }
    }

    pub fn min_fuse_size(&self) -> usize {
        self.min_fuse_size
    }

    /// Kernels of at least `min_fuse_size` members, ordered by leader.
    #[tracing::instrument(skip_all, fields(min_fuse_size = self.min_fuse_size))]
    pub fn collect(&self, graph: &Graph) -> Vec<LoopKernel> {
        let order = graph.toposort();
        let mut groups = Groups::default();
        let mut element_of: Vec<Option<usize>> = vec![None; graph.len()];

        for &id in &order {
            if !(self.predicate)(graph, id) {
                continue;
            }
            let mut roots: SmallVec<[usize; 4]> = graph
                .node(id)
                .inputs()
                .iter()
                .filter_map(|input| element_of[input.node.index()])
                .map(|element| groups.find(element))
                .collect();
            roots.sort_by_key(|&root| groups.leader[root]);
            roots.dedup();

            let element = groups.push(id);
            let mut root = element;
            if let Some((&first, rest)) = roots.split_first() {
                root = first;
                for &other in rest {
                    root = groups.union(root, other);
                }
                root = groups.union(root, element);
            }
            element_of[id.index()] = Some(element);
            tracing::trace!(node = %id, leader = %groups.members[root][0], "node grouped");
        }

        let roots: Vec<usize> = (0..groups.parent.len()).filter(|&element| groups.parent[element] == element).collect();
        let consumers = ConsumerIndex::build(graph);
        let mut kernels = Vec::new();
        for &root in &roots {
            if groups.size[root] >= self.min_fuse_size {
                let members = std::mem::take(&mut groups.members[root]);
                kernels.push((groups.leader[root], kernel(graph, &consumers, members)));
            }
        }
        kernels.sort_by_key(|(leader, _)| *leader);

        tracing::debug!(kernels = kernels.len(), discarded = roots.len() - kernels.len(), "partition complete");
        kernels.into_iter().map(|(_, kernel)| kernel).collect()
    }
}

fn kernel(graph: &Graph, consumers: &ConsumerIndex, members: Vec<NodeId>) -> LoopKernel {
    let in_group: HashSet<NodeId> = members.iter().copied().collect();
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for &id in &members {
        for &input in graph.node(id).inputs() {
            if !in_group.contains(&input.node) && !inputs.contains(&input) {
                inputs.push(input);
            }
        }
        let output = id.output(0);
        let escapes = consumers.uses_of(output).any(|u| !in_group.contains(&u.consumer));
        if escapes || graph.results().contains(&output) {
            outputs.push(output);
        }
    }
    let leader = members[0];
    LoopKernel { leader, shape: graph.shape(leader).clone(), members, inputs, outputs }
}
