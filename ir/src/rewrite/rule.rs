use std::borrow::Cow;

use smallvec::{SmallVec, smallvec};
use snafu::ensure;

use crate::error::*;
use crate::graph::{ConsumerIndex, Graph, NodeId, Output};
use crate::pattern::{Bindings, Pattern};

/// A successful match handed to refinements and builders.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    pub root: NodeId,
    pub bindings: &'a Bindings,
    pub consumers: &'a ConsumerIndex,
}

impl RuleMatch<'_> {
    pub fn output(&self, label: &str) -> Result<Output> {
        self.bindings.output(label)
    }

    pub fn node(&self, label: &str) -> Result<NodeId> {
        self.bindings.node(label)
    }
}

/// Extra check run after the structural match; `false` skips the rule.
pub type RefineFn = fn(&Graph, &RuleMatch<'_>) -> bool;

/// Builds the replacement subgraph for a match.
pub type BuildFn = fn(&mut Graph, &RuleMatch<'_>) -> Result<Replacement>;

/// Rewrite rule: pattern, optional refinement and builder.
#[derive(Debug, Clone)]
pub struct Rule {
    name: Cow<'static, str>,
    pattern: Pattern,
    refine: Option<RefineFn>,
    build: BuildFn,
}

impl Rule {
    /// Validates `pattern` and checks that every label in `reads` (the
    /// labels `build` looks up) is bound by it.
    pub fn new(name: impl Into<Cow<'static, str>>, pattern: Pattern, reads: &[&str], build: BuildFn) -> Result<Self> {
        let name = name.into();
        pattern.validate()?;
        let labels = pattern.labels();
        for label in reads {
            ensure!(
                labels.iter().any(|l| &**l == *label),
                MalformedPatternSnafu { reason: format!("rule `{name}` reads label `{label}` its pattern never binds") }
            );
        }
        Ok(Self { name, pattern, refine: None, build })
    }

    pub fn with_refinement(mut self, refine: RefineFn) -> Self {
        self.refine = Some(refine);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn refines(&self, graph: &Graph, m: &RuleMatch<'_>) -> bool {
        self.refine.is_none_or(|refine| refine(graph, m))
    }

    pub fn build(&self, graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        (self.build)(graph, m)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    /// Root output `i` becomes output `i` of this node.
    Node(NodeId),
    /// Root output `i` becomes the `i`-th entry.
    Outputs(SmallVec<[Output; 2]>),
}

/// What a builder hands back: the stand-in for the matched root, plus any
/// other outputs of the matched region that must move as well.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    target: Target,
    extra: SmallVec<[(Output, Output); 2]>,
}

impl Replacement {
    pub fn node(id: NodeId) -> Self {
        Self { target: Target::Node(id), extra: SmallVec::new() }
    }

    /// Replaces a single-output root with an existing output.
    pub fn output(output: Output) -> Self {
        Self { target: Target::Outputs(smallvec![output]), extra: SmallVec::new() }
    }

    pub fn outputs(outputs: impl IntoIterator<Item = Output>) -> Self {
        Self { target: Target::Outputs(outputs.into_iter().collect()), extra: SmallVec::new() }
    }

    /// Also moves the consumers of `old`, which must be part of the matched
    /// region, onto `new`.
    pub fn also(mut self, old: Output, new: Output) -> Self {
        self.extra.push((old, new));
        self
    }

    /// `(old, new)` output pairs to retarget, root outputs first.
    pub fn pairs(&self, graph: &Graph, root: NodeId) -> Result<SmallVec<[(Output, Output); 4]>> {
        let count = graph.node(root).outputs().len();
        let mut pairs: SmallVec<[(Output, Output); 4]> = match &self.target {
            Target::Node(id) => {
                let available = graph.node(*id).outputs().len();
                ensure!(
                    available >= count,
                    ArityMismatchSnafu { context: "replacement outputs", expected: count, actual: available }
                );
                (0..count).map(|slot| (root.output(slot), id.output(slot))).collect()
            }
            Target::Outputs(outputs) => {
                ensure!(
                    outputs.len() == count,
                    ArityMismatchSnafu { context: "replacement outputs", expected: count, actual: outputs.len() }
                );
                outputs.iter().enumerate().map(|(slot, &new)| (root.output(slot), new)).collect()
            }
        };
        pairs.extend(self.extra.iter().copied());
        Ok(pairs)
    }
}
