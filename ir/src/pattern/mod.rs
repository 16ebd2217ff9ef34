//! Declarative structural patterns over graphs.
//!
//! A [`Pattern`] is a small tree mirroring the shape of the subgraph it
//! looks for. Labels are its free variables, Skips make predicate-accepted
//! nodes (such as reshapes) optional, and commutative binary operators match
//! in either operand order. [`Matcher`] runs a pattern against a graph root
//! and exposes the resulting [`Bindings`].

mod matcher;
pub mod predicate;

use std::sync::Arc;

use smallvec::{SmallVec, smallvec};
use snafu::ensure;

use crate::error::*;
use crate::graph::TensorType;
use crate::op::OpKey;
use crate::types::{BinaryOp, UnaryOp};

pub use matcher::{Bindings, Matcher};
pub use predicate::NodePredicate;

/// Pattern for matching graph subtrees.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Free variable. Binds the first output it meets; afterwards matches
    /// only that same output.
    Label { name: Arc<str>, ty: Option<TensorType>, predicate: Option<NodePredicate> },

    /// Matches `inner` directly, or looks through a chain of nodes accepted
    /// by `predicate`, following each one's single input.
    Skip { inner: Box<Pattern>, predicate: Option<NodePredicate> },

    /// Node whose operator is one of `keys`, with inputs matching `src`.
    Op {
        keys: SmallVec<[OpKey; 2]>,
        src: Vec<Pattern>,
        slot: Option<usize>,
        name: Option<Arc<str>>,
        predicate: Option<NodePredicate>,
    },

    /// First alternative that matches wins.
    Any(Vec<Pattern>),
}

impl Pattern {
    pub fn label(name: impl Into<Arc<str>>) -> Self {
        Self::Label { name: name.into(), ty: None, predicate: None }
    }

    /// Skip with no predicate; [`validate`](Self::validate) rejects it until
    /// one is attached with [`with_predicate`](Self::with_predicate).
    pub fn skip(inner: Pattern) -> Self {
        Self::Skip { inner: Box::new(inner), predicate: None }
    }

    pub fn skip_if(predicate: NodePredicate, inner: Pattern) -> Self {
        Self::Skip { inner: Box::new(inner), predicate: Some(predicate) }
    }

    pub fn op(key: impl Into<OpKey>, src: Vec<Pattern>) -> Self {
        Self::Op { keys: smallvec![key.into()], src, slot: None, name: None, predicate: None }
    }

    pub fn ops(keys: impl IntoIterator<Item = OpKey>, src: Vec<Pattern>) -> Self {
        Self::Op { keys: keys.into_iter().collect(), src, slot: None, name: None, predicate: None }
    }

    pub fn unary(op: UnaryOp, x: Pattern) -> Self {
        Self::op(op, vec![x])
    }

    pub fn binary(op: BinaryOp, a: Pattern, b: Pattern) -> Self {
        Self::op(op, vec![a, b])
    }

    pub fn any(alternatives: Vec<Pattern>) -> Self {
        Self::Any(alternatives)
    }

    /// Binds the node matched by an `Op` pattern under `name`.
    pub fn named(mut self, label: impl Into<Arc<str>>) -> Self {
        if let Self::Op { name, .. } = &mut self {
            *name = Some(label.into());
        }
        self
    }

    /// Restricts an `Op` pattern to one output slot of its node.
    pub fn at_slot(mut self, index: usize) -> Self {
        if let Self::Op { slot, .. } = &mut self {
            *slot = Some(index);
        }
        self
    }

    /// Restricts a `Label` to outputs of exactly this type.
    pub fn typed(mut self, tensor_type: TensorType) -> Self {
        if let Self::Label { ty, .. } = &mut self {
            *ty = Some(tensor_type);
        }
        self
    }

    pub fn with_predicate(mut self, pred: NodePredicate) -> Self {
        match &mut self {
            Self::Label { predicate, .. } | Self::Skip { predicate, .. } | Self::Op { predicate, .. } => {
                *predicate = Some(pred);
            }
            Self::Any(_) => {}
        }
        self
    }

    /// Construction-time checks; a pattern that passes can be matched
    /// without further errors.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Label { name, .. } => {
                ensure!(!name.is_empty(), MalformedPatternSnafu { reason: "label with an empty name" });
            }
            Self::Skip { inner, predicate } => {
                ensure!(predicate.is_some(), MalformedPatternSnafu { reason: "skip without a predicate" });
                inner.validate()?;
            }
            Self::Op { keys, src, .. } => {
                ensure!(!keys.is_empty(), MalformedPatternSnafu { reason: "op pattern accepting no operators" });
                src.iter().try_for_each(Pattern::validate)?;
            }
            Self::Any(alternatives) => {
                ensure!(!alternatives.is_empty(), MalformedPatternSnafu { reason: "any without alternatives" });
                alternatives.iter().try_for_each(Pattern::validate)?;
            }
        }
        Ok(())
    }

    /// Names this pattern can bind, in first-appearance order.
    pub fn labels(&self) -> Vec<Arc<str>> {
        let mut names = Vec::new();
        self.collect_labels(&mut names);
        names
    }

    fn collect_labels(&self, names: &mut Vec<Arc<str>>) {
        match self {
            Self::Label { name, .. } => push_unique(names, name),
            Self::Skip { inner, .. } => inner.collect_labels(names),
            Self::Op { src, name, .. } => {
                if let Some(name) = name {
                    push_unique(names, name);
                }
                src.iter().for_each(|p| p.collect_labels(names));
            }
            Self::Any(alternatives) => alternatives.iter().for_each(|p| p.collect_labels(names)),
        }
    }
}

fn push_unique(names: &mut Vec<Arc<str>>, name: &Arc<str>) {
    if !names.contains(name) {
        names.push(name.clone());
    }
}
