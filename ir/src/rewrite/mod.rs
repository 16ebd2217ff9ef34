//! In-place graph rewriting.
//!
//! A [`Rule`] pairs a [`Pattern`](crate::pattern::Pattern) with a builder
//! function. [`graph_rewrite`] sweeps a graph once, applying the first rule
//! that matches at each live node, and commits every application through a
//! [`Transaction`] so a rejected replacement never touches an edge.

pub mod engine;
pub mod rule;
pub mod transaction;

pub use engine::{Application, PassReport, Rejection, Traversal, graph_rewrite};
pub use rule::{BuildFn, RefineFn, Replacement, Rule, RuleMatch};
pub use transaction::Transaction;
