//! Intermediate representation for the graft rewriting core.
//!
//! # Module Organization
//!
//! - [`types`] - Constant payloads and elementwise operator tags
//! - [`op`] - Operation enum defining every node kind
//! - [`graph`] - Arena graph, typed constructors and the consumer index
//! - [`shape`] - Shape inference utilities
//! - [`pattern`] - Structural patterns and the matcher
//! - [`rewrite`] - Rules, transactional replacement and the sweep driver
//! - [`error`] - Error types and result handling

pub mod error;
pub mod graph;
pub mod op;
pub mod shape;
pub mod types;

pub mod pattern;
pub mod rewrite;


pub use error::{Error, Result};
pub use graph::{ConsumerIndex, Graph, GraphTree, Node, NodeId, Output, TensorType, Use};
pub use op::{Op, OpKey, OpKind};
pub use shape::{Axes, Shape};
pub use types::{Activation, BinaryOp, ConstValue, ConvAttrs, IntoConst, UnaryOp};

pub use pattern::{Bindings, Matcher, NodePredicate, Pattern};
pub use rewrite::{PassReport, Replacement, Rule, RuleMatch, Transaction, Traversal, graph_rewrite};

pub use graft_dtype::DType;
