//! Arena-backed computation graph.
//!
//! Nodes live in a `Vec` and are addressed by [`NodeId`]. Edges point from a
//! consumer to a producer output ([`Output`]); producers never store their
//! consumers; that reverse direction is the job of [`ConsumerIndex`].

mod build;
mod consumers;
mod tree;

use std::fmt;

use graft_dtype::DType;
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::op::{Op, OpKey};
use crate::shape::Shape;

pub use consumers::{ConsumerIndex, Use};
pub use tree::GraphTree;

/// Stable handle of a node inside its [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("%{_0}")]
pub struct NodeId(u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn output(self, slot: usize) -> Output {
        Output { node: self, slot }
    }
}

/// One output slot of a node; the endpoint of every edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{node}:{slot}")]
pub struct Output {
    pub node: NodeId,
    pub slot: usize,
}

impl Output {
    pub const fn new(node: NodeId, slot: usize) -> Self {
        Self { node, slot }
    }
}

impl From<NodeId> for Output {
    fn from(node: NodeId) -> Self {
        Self { node, slot: 0 }
    }
}

/// Element type and shape of one node output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(dtype: DType, shape: &[usize]) -> Self {
        Self { dtype, shape: Shape::from_slice(shape) }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape.as_slice())
    }
}

/// One operator invocation.
///
/// Output types are fixed at construction; only input edges change, and only
/// through the rewrite machinery.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    op: Op,
    inputs: SmallVec<[Output; 4]>,
    outputs: SmallVec<[TensorType; 1]>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn key(&self) -> OpKey {
        OpKey::of(&self.op)
    }

    pub fn inputs(&self) -> &[Output] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Output {
        self.inputs[index]
    }

    pub fn outputs(&self) -> &[TensorType] {
        &self.outputs
    }

    pub fn output(&self, slot: usize) -> Output {
        Output::new(self.id, slot)
    }

    pub fn output_type(&self, slot: usize) -> &TensorType {
        &self.outputs[slot]
    }

    /// Shape of output 0.
    pub fn shape(&self) -> &Shape {
        &self.outputs[0].shape
    }

    /// Element type of output 0.
    pub fn dtype(&self) -> DType {
        self.outputs[0].dtype
    }
}

/// Computation graph: node arena plus designated parameters and results.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    results: Vec<Output>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes ever created, live or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn op(&self, id: NodeId) -> &Op {
        &self.nodes[id.index()].op
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn results(&self) -> &[Output] {
        &self.results
    }

    /// Type of an output, checking that it exists.
    pub fn output_type(&self, output: Output) -> Result<&TensorType> {
        self.get(output.node).and_then(|node| node.outputs.get(output.slot)).context(UnknownOutputSnafu { output })
    }

    pub fn shape(&self, output: impl Into<Output>) -> &Shape {
        let output = output.into();
        &self.node(output.node).outputs[output.slot].shape
    }

    pub fn dtype(&self, output: impl Into<Output>) -> DType {
        let output = output.into();
        self.node(output.node).outputs[output.slot].dtype
    }

    pub fn add_result(&mut self, output: impl Into<Output>) -> Result<()> {
        let output = output.into();
        self.output_type(output)?;
        self.results.push(output);
        Ok(())
    }

    pub fn set_results(&mut self, outputs: impl IntoIterator<Item = Output>) -> Result<()> {
        self.results.clear();
        outputs.into_iter().try_for_each(|output| self.add_result(output))
    }

    /// Appends a node after checking that its inputs exist and that their
    /// count fits the operator. Type inference is up to the caller.
    pub fn add_node(
        &mut self,
        op: Op,
        inputs: impl IntoIterator<Item = Output>,
        outputs: impl IntoIterator<Item = TensorType>,
    ) -> Result<NodeId> {
        let inputs: SmallVec<[Output; 4]> = inputs.into_iter().collect();
        if let Some(arity) = op.arity() {
            ensure!(
                inputs.len() == arity,
                ArityMismatchSnafu { context: op.kind().to_string(), expected: arity, actual: inputs.len() }
            );
        }
        for &input in &inputs {
            self.output_type(input)?;
        }

        let id = NodeId(self.nodes.len() as u32);
        if let Op::Parameter { .. } = op {
            self.parameters.push(id);
        }
        self.nodes.push(Node { id, op, inputs, outputs: outputs.into_iter().collect() });
        Ok(id)
    }

    pub(crate) fn set_input(&mut self, consumer: NodeId, index: usize, producer: Output) {
        self.nodes[consumer.index()].inputs[index] = producer;
    }

    /// Points every result that referenced `old` at `new`.
    pub(crate) fn replace_result(&mut self, old: Output, new: Output) -> bool {
        let mut replaced = false;
        for result in self.results.iter_mut().filter(|r| **r == old) {
            *result = new;
            replaced = true;
        }
        replaced
    }

    /// Nodes reachable from the results, producers before consumers.
    pub fn toposort(&self) -> Vec<NodeId> {
        self.toposort_from(&self.results)
    }

    /// Nodes reachable from `roots`, producers before consumers.
    ///
    /// Inputs are visited in order, so the result is deterministic for a
    /// given graph.
    pub fn toposort_from(&self, roots: &[Output]) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut stack: Vec<(NodeId, bool)> = roots.iter().rev().map(|r| (r.node, false)).collect();

        while let Some((id, processed)) = stack.pop() {
            if processed {
                order.push(id);
                continue;
            }
            if std::mem::replace(&mut visited[id.index()], true) {
                continue;
            }
            stack.push((id, true));
            for input in self.nodes[id.index()].inputs.iter().rev() {
                if !visited[input.node.index()] {
                    stack.push((input.node, false));
                }
            }
        }
        order
    }

    /// Live nodes whose operator matches `key`, in topological order.
    pub fn find_live(&self, key: impl Into<OpKey>) -> Vec<NodeId> {
        let key = key.into();
        self.toposort().into_iter().filter(|&id| self.node(id).key() == key).collect()
    }

    pub fn count_live(&self, key: impl Into<OpKey>) -> usize {
        self.find_live(key).len()
    }

    /// Renders every result as an indented tree.
    pub fn tree(&self) -> String {
        self.results.iter().map(|&result| GraphTree::new(self, result).render()).collect()
    }
}
