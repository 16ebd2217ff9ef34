use std::sync::Arc;

use smallvec::SmallVec;
use snafu::OptionExt;

use super::Pattern;
use crate::error::*;
use crate::graph::{Graph, NodeId, Output};

/// Label bindings of one successful match.
///
/// Stored inline; patterns rarely bind more than a handful of names, so a
/// linear scan beats hashing here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: SmallVec<[(Arc<str>, Output); 8]>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Output> {
        self.entries.iter().find(|(n, _)| &**n == name).map(|(_, output)| *output)
    }

    /// Bound output, or `MalformedPattern` if the pattern never bound `name`.
    pub fn output(&self, name: &str) -> Result<Output> {
        self.get(name).context(MalformedPatternSnafu { reason: format!("label `{name}` is not bound") })
    }

    pub fn node(&self, name: &str) -> Result<NodeId> {
        self.output(name).map(|output| output.node)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Output)> {
        self.entries.iter().map(|(name, output)| (&**name, *output))
    }

    /// Binds `name` on first use; afterwards only the identical output is
    /// accepted.
    fn bind(&mut self, name: &Arc<str>, output: Output) -> bool {
        match self.get(name) {
            Some(existing) => existing == output,
            None => {
                self.entries.push((name.clone(), output));
                true
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Runs patterns against roots of one graph.
#[derive(Debug)]
pub struct Matcher<'g> {
    graph: &'g Graph,
    bindings: Bindings,
}

impl<'g> Matcher<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph, bindings: Bindings::new() }
    }

    /// Matches `pattern` against output 0 of `root`.
    pub fn try_match(&mut self, pattern: &Pattern, root: NodeId) -> bool {
        self.try_match_output(pattern, root.output(0))
    }

    /// On success [`bindings`](Self::bindings) holds the match; on failure
    /// it is empty.
    pub fn try_match_output(&mut self, pattern: &Pattern, root: Output) -> bool {
        self.bindings.clear();
        let matched = pattern.match_output(self.graph, root, &mut self.bindings);
        if matched {
            tracing::trace!(%root, bindings = self.bindings.len(), "pattern matched");
        } else {
            self.bindings.clear();
        }
        matched
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }
}

impl Pattern {
    /// Returns `Some(bindings)` if the pattern matches `root`.
    pub fn match_first(&self, graph: &Graph, root: Output) -> Option<Bindings> {
        let mut store = Bindings::new();
        if self.match_output(graph, root, &mut store) { Some(store) } else { None }
    }

    /// Single-solution matching. Choice points (commutative operands, `Any`
    /// alternatives, skip-through) work on a copy of `store` and commit it
    /// only when the branch succeeds.
    fn match_output(&self, graph: &Graph, output: Output, store: &mut Bindings) -> bool {
        match self {
            Pattern::Label { name, ty, predicate } => {
                if let Some(ty) = ty
                    && graph.node(output.node).output_type(output.slot) != ty
                {
                    return false;
                }
                if let Some(predicate) = predicate
                    && !predicate.test(graph, output)
                {
                    return false;
                }
                store.bind(name, output)
            }

            Pattern::Skip { inner, predicate } => {
                let mut store_copy = store.clone();
                if inner.match_output(graph, output, &mut store_copy) {
                    *store = store_copy;
                    return true;
                }
                let node = graph.node(output.node);
                match predicate {
                    Some(predicate) if node.inputs().len() == 1 && predicate.test(graph, output) => {
                        self.match_output(graph, node.input(0), store)
                    }
                    _ => false,
                }
            }

            Pattern::Any(alternatives) => {
                for pattern in alternatives {
                    let mut store_copy = store.clone();
                    if pattern.match_output(graph, output, &mut store_copy) {
                        *store = store_copy;
                        return true;
                    }
                }
                false
            }

            Pattern::Op { keys, src, slot, name, predicate } => {
                let node = graph.node(output.node);

                // 1. Check operator
                let key = node.key();
                if !keys.contains(&key) {
                    return false;
                }

                // 2. Check output slot
                if let Some(slot) = slot
                    && *slot != output.slot
                {
                    return false;
                }

                // 3. Check predicate
                if let Some(predicate) = predicate
                    && !predicate.test(graph, output)
                {
                    return false;
                }

                // 4. Check arity
                let inputs = node.inputs();
                if inputs.len() != src.len() {
                    return false;
                }

                // 5. Check/store named binding
                if let Some(name) = name
                    && !store.bind(name, output)
                {
                    return false;
                }

                // 6. Match sources
                if key.is_commutative() && src.len() == 2 {
                    return Self::match_commutative(graph, inputs, src, store);
                }
                inputs.iter().zip(src).all(|(&input, pattern)| pattern.match_output(graph, input, store))
            }
        }
    }

    /// Tries `(0, 1)` before `(1, 0)`; the first ordering that matches wins.
    fn match_commutative(graph: &Graph, inputs: &[Output], src: &[Pattern], store: &mut Bindings) -> bool {
        for order in [[0, 1], [1, 0]] {
            let mut store_copy = store.clone();
            if src[0].match_output(graph, inputs[order[0]], &mut store_copy)
                && src[1].match_output(graph, inputs[order[1]], &mut store_copy)
            {
                *store = store_copy;
                return true;
            }
        }
        false
    }
}
