use smallvec::SmallVec;

use super::{Graph, NodeId, Output};

/// One consumer edge: input `input` of `consumer` reads slot `slot` of the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub consumer: NodeId,
    pub input: usize,
    pub slot: usize,
}

/// Reverse edge index over the live part of a graph.
///
/// Built once per pass and kept in sync by [`retarget`](Self::retarget),
/// [`register`](Self::register) and [`prune`](Self::prune) while the pass
/// mutates the graph.
#[derive(Debug, Clone, Default)]
pub struct ConsumerIndex {
    uses: Vec<SmallVec<[Use; 4]>>,
    pruned: Vec<bool>,
}

impl ConsumerIndex {
    /// Index of every node reachable from the graph results. Unreachable
    /// nodes start out pruned.
    pub fn build(graph: &Graph) -> Self {
        let mut index = Self { uses: vec![SmallVec::new(); graph.len()], pruned: vec![true; graph.len()] };
        for id in graph.toposort() {
            index.pruned[id.index()] = false;
            index.add_uses(graph, id);
        }
        index
    }

    fn grow(&mut self, len: usize) {
        if self.uses.len() < len {
            self.uses.resize_with(len, SmallVec::new);
            self.pruned.resize(len, true);
        }
    }

    fn add_uses(&mut self, graph: &Graph, id: NodeId) {
        for (input, producer) in graph.node(id).inputs().iter().enumerate() {
            self.uses[producer.node.index()].push(Use { consumer: id, input, slot: producer.slot });
        }
    }

    pub fn uses(&self, id: NodeId) -> &[Use] {
        self.uses.get(id.index()).map(SmallVec::as_slice).unwrap_or_default()
    }

    pub fn uses_of(&self, output: Output) -> impl Iterator<Item = &Use> {
        self.uses(output.node).iter().filter(move |u| u.slot == output.slot)
    }

    /// Consumer edges plus result references of `id`.
    pub fn use_count(&self, graph: &Graph, id: NodeId) -> usize {
        self.uses(id).len() + graph.results().iter().filter(|r| r.node == id).count()
    }

    pub fn is_pruned(&self, id: NodeId) -> bool {
        self.pruned.get(id.index()).copied().unwrap_or(true)
    }

    /// Adds the nodes created since `created_from` that are reachable from
    /// `roots`. Created nodes nothing reaches stay pruned.
    pub fn register(&mut self, graph: &Graph, roots: &[Output], created_from: usize) {
        self.grow(graph.len());
        let mut stack: Vec<NodeId> = roots.iter().map(|r| r.node).collect();
        while let Some(id) = stack.pop() {
            if id.index() < created_from || !self.pruned[id.index()] {
                continue;
            }
            self.pruned[id.index()] = false;
            self.add_uses(graph, id);
            stack.extend(graph.node(id).inputs().iter().map(|i| i.node));
        }
    }

    /// Moves every consumer of `old` onto `new`, results included.
    ///
    /// Consumers created at or after `created_from` are left alone so a
    /// replacement that reads `old` does not end up reading itself.
    pub fn retarget(&mut self, graph: &mut Graph, old: Output, new: Output, created_from: usize) {
        self.grow(graph.len());
        let (moved, kept): (SmallVec<[Use; 4]>, SmallVec<[Use; 4]>) = self.uses[old.node.index()]
            .iter()
            .copied()
            .partition(|u| u.slot == old.slot && u.consumer.index() < created_from);
        self.uses[old.node.index()] = kept;

        for u in moved {
            graph.set_input(u.consumer, u.input, new);
            self.uses[new.node.index()].push(Use { slot: new.slot, ..u });
        }
        graph.replace_result(old, new);
    }

    /// Marks `id` pruned if nothing consumes it, then cascades into its
    /// producers. Returns how many nodes were pruned.
    pub fn prune(&mut self, graph: &Graph, id: NodeId) -> usize {
        let mut pruned = 0;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if self.is_pruned(id) || self.use_count(graph, id) > 0 {
                continue;
            }
            self.pruned[id.index()] = true;
            pruned += 1;
            for (input, producer) in graph.node(id).inputs().iter().enumerate() {
                self.uses[producer.node.index()].retain(|u| !(u.consumer == id && u.input == input));
                stack.push(producer.node);
            }
        }
        pruned
    }
}
