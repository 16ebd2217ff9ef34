//! Tree visualization for graphs.
//!
//! Shared producers are printed once; later occurrences show
//! `[id] → (see above)`.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::io;
use std::rc::Rc;

use ptree::{Style, TreeItem};

use super::{Graph, NodeId, Output};
use crate::op::Op;

#[derive(Clone)]
pub struct GraphTree<'g> {
    graph: &'g Graph,
    output: Output,
    visited: Rc<RefCell<HashSet<NodeId>>>,
    is_backref: Rc<Cell<bool>>,
}

impl<'g> GraphTree<'g> {
    pub fn new(graph: &'g Graph, output: Output) -> Self {
        Self::from_child(graph, output, Rc::default())
    }

    fn from_child(graph: &'g Graph, output: Output, visited: Rc<RefCell<HashSet<NodeId>>>) -> Self {
        Self { graph, output, visited, is_backref: Rc::default() }
    }

    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(err) = ptree::write_tree(self, &mut buf) {
            tracing::warn!(%err, "tree rendering failed");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl TreeItem for GraphTree<'_> {
    type Child = Self;

    fn write_self<W: io::Write>(&self, f: &mut W, _style: &Style) -> io::Result<()> {
        let id = self.output.node;
        if !self.visited.borrow_mut().insert(id) {
            self.is_backref.set(true);
            return write!(f, "[{id}] → (see above)");
        }
        write!(f, "{}", format_node(self.graph, self.output))
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        if self.is_backref.get() {
            return Cow::Borrowed(&[]);
        }
        let inputs = self.graph.node(self.output.node).inputs();
        Cow::Owned(inputs.iter().map(|&i| Self::from_child(self.graph, i, self.visited.clone())).collect())
    }
}

/// `[id:slot] OP : type`
fn format_node(graph: &Graph, output: Output) -> String {
    let node = graph.node(output.node);
    let op_str = match node.op() {
        Op::Parameter { index } => format!("PARAMETER({index})"),
        Op::Constant(value) => format!("CONST({:?})", value),
        Op::Unary(op) => format!("{op}"),
        Op::Binary(op) => format!("{op}"),
        Op::Reshape { input_order } => format!("RESHAPE(order={:?})", input_order.as_slice()),
        Op::Broadcast { axes } => format!("BROADCAST(axes={:?})", axes.as_slice()),
        Op::Sum { axes } => format!("SUM(axes={:?})", axes.as_slice()),
        Op::Pad { below, above } => format!("PAD(below={:?}, above={:?})", below.as_slice(), above.as_slice()),
        Op::Slice { lower, upper } => format!("SLICE({:?}..{:?})", lower.as_slice(), upper.as_slice()),
        Op::GetOutputElement { index } => format!("GET_OUTPUT_ELEMENT({index})"),
        Op::MatmulBias { transpose_a, transpose_b, .. } => format!("MATMUL_BIAS(ta={transpose_a}, tb={transpose_b})"),
        Op::Rnn { timesteps } => format!("RNN(timesteps={timesteps})"),
        other => other.kind().to_string(),
    };
    format!("[{output}] {op_str} : {}", node.output_type(output.slot))
}
