use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;
use crate::graph::{ConsumerIndex, Graph, Output};

/// All-or-nothing edge retargeting.
///
/// Record the moves with [`retarget`](Self::retarget) after building the
/// replacement nodes; [`commit`](Self::commit) checks every pair before the
/// first edge changes.
#[derive(Debug, Clone)]
pub struct Transaction {
    created_from: usize,
    pairs: SmallVec<[(Output, Output); 4]>,
}

impl Transaction {
    /// Starts a transaction; nodes created after this call count as the
    /// replacement.
    pub fn begin(graph: &Graph) -> Self {
        Self { created_from: graph.len(), pairs: SmallVec::new() }
    }

    pub fn retarget(&mut self, old: Output, new: Output) {
        self.pairs.push((old, new));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Checks that each replacement output has exactly the type of the
    /// output it replaces, then moves all consumers and prunes what was left
    /// unused. Returns the number of pruned nodes.
    pub fn commit(self, graph: &mut Graph, consumers: &mut ConsumerIndex) -> Result<usize> {
        for &(old, new) in &self.pairs {
            let expected = graph.output_type(old)?;
            let actual = graph.output_type(new)?;
            ensure!(
                expected == actual,
                ShapeMismatchSnafu {
                    context: format!("replacing {old} with {new}"),
                    expected: expected.clone(),
                    actual: actual.clone()
                }
            );
        }

        let news: SmallVec<[Output; 4]> = self.pairs.iter().map(|&(_, new)| new).collect();
        consumers.register(graph, &news, self.created_from);
        for &(old, new) in &self.pairs {
            if old != new {
                consumers.retarget(graph, old, new, self.created_from);
            }
        }
        Ok(self.pairs.iter().map(|&(old, _)| consumers.prune(graph, old.node)).sum())
    }
}
