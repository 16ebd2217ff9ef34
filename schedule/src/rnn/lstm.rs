use graft_ir::rewrite::{Traversal, graph_rewrite};
use graft_ir::{
    BinaryOp, Graph, NodePredicate, Op, OpKind, Output, PassReport, Pattern, Replacement, Result, Rule, RuleMatch,
    UnaryOp,
};

use super::ROW_BROADCAST;
use crate::pass::GraphPass;

/// Slice `[:, K*H .. (K+1)*H]` of a `[batch, 4*H]` gate matrix.
fn is_gate_slice<const K: usize>(graph: &Graph, output: Output) -> bool {
    let node = graph.node(output.node);
    let Op::Slice { lower, upper } = node.op() else {
        return false;
    };
    let input = graph.shape(node.input(0));
    if input.len() != 2 || input[1] % 4 != 0 {
        return false;
    }
    let hidden = input[1] / 4;
    lower.as_slice() == [0, K * hidden] && upper.as_slice() == [input[0], (K + 1) * hidden]
}

const INPUT_GATE: NodePredicate = NodePredicate::new("input_gate", is_gate_slice::<0>);
const FORGET_GATE: NodePredicate = NodePredicate::new("forget_gate", is_gate_slice::<1>);
const CELL_GATE: NodePredicate = NodePredicate::new("cell_gate", is_gate_slice::<2>);
const OUTPUT_GATE: NodePredicate = NodePredicate::new("output_gate", is_gate_slice::<3>);

/// `dot(.., ..) + dot(.., ..) + broadcast(bias)`: the four gates of a cell,
/// before activation, side by side.
fn gates() -> Pattern {
    let projection = |side: &str| {
        Pattern::op(OpKind::Dot, vec![Pattern::label(format!("{side}_input")), Pattern::label(format!("{side}_weights"))])
    };
    let projections = Pattern::binary(BinaryOp::Add, projection("lhs"), projection("rhs"));
    let bias = Pattern::op(OpKind::Broadcast, vec![Pattern::label("bias")]).with_predicate(ROW_BROADCAST);
    Pattern::binary(BinaryOp::Add, projections, bias).named("gates")
}

fn gate(slice: NodePredicate, activation: UnaryOp) -> Pattern {
    Pattern::unary(activation, Pattern::op(OpKind::Slice, vec![gates()]).with_predicate(slice))
}

/// `h = o * tanh(c)` where `c = f * c_prev + i * g`.
fn cell() -> Pattern {
    let forget = Pattern::binary(BinaryOp::Mul, gate(FORGET_GATE, UnaryOp::Sigmoid), Pattern::label("c_prev"));
    let update = Pattern::binary(BinaryOp::Mul, gate(INPUT_GATE, UnaryOp::Sigmoid), gate(CELL_GATE, UnaryOp::Tanh));
    let c = Pattern::binary(BinaryOp::Add, forget, update).named("c");
    Pattern::binary(BinaryOp::Mul, gate(OUTPUT_GATE, UnaryOp::Sigmoid), Pattern::unary(UnaryOp::Tanh, c))
}

/// `(input, weights)` of one gate projection.
type Projection = (Output, Output);

/// Splits the two projections into layer input and recurrent input.
///
/// Only a side whose input is a `[batch, hidden]` state and whose weights
/// are `[hidden, 4*hidden]` can be recurrent. Among those the choice goes,
/// in order, to:
///
/// - the side reading the hidden state of the `Lstm` that produced `c_prev`;
/// - the side whose weights the new hidden state is multiplied with
///   downstream, which is how the head of a layer is told apart;
/// - the right operand of the graph.
fn split_projections(
    graph: &Graph,
    m: &RuleMatch<'_>,
    c_prev: Output,
    lhs: Projection,
    rhs: Projection,
) -> Result<(Projection, Projection)> {
    let state = graph.output_type(c_prev)?;
    let hidden = state.shape.get(1).copied().unwrap_or(0);
    let fits = |(input, weights): Projection| {
        graph.output_type(input).is_ok_and(|ty| ty == state) && graph.shape(weights).as_slice() == [hidden, 4 * hidden]
    };
    let paired_with_cell = |(input, _): Projection| {
        input.node == c_prev.node && input.slot == 0 && c_prev.slot == 1 && matches!(graph.op(input.node), Op::Lstm)
    };
    let feeds_next_step = |(_, weights): Projection| {
        m.consumers.uses_of(m.root.output(0)).any(|u| {
            u.input == 0 && matches!(graph.op(u.consumer), Op::Dot) && graph.node(u.consumer).input(1) == weights
        })
    };

    let candidates = [(lhs, rhs), (rhs, lhs)];
    let preferred = |test: &dyn Fn(Projection) -> bool| {
        candidates.iter().copied().find(|&(_, recurrent)| fits(recurrent) && test(recurrent))
    };
    Ok(preferred(&paired_with_cell)
        .or_else(|| preferred(&feeds_next_step))
        .or_else(|| preferred(&|_: Projection| true))
        .unwrap_or((lhs, rhs)))
}

fn lstm_cell() -> Result<Rule> {
    fn build(graph: &mut Graph, m: &RuleMatch<'_>) -> Result<Replacement> {
        let c_prev = m.output("c_prev")?;
        let lhs = (m.output("lhs_input")?, m.output("lhs_weights")?);
        let rhs = (m.output("rhs_input")?, m.output("rhs_weights")?);
        let ((x, w_layer), (h_prev, w_iter)) = split_projections(graph, m, c_prev, lhs, rhs)?;

        let cell = graph.lstm(x, h_prev, c_prev, w_layer, w_iter, m.output("bias")?)?;
        Ok(Replacement::node(cell).also(m.output("c")?, cell.output(1)))
    }

    let reads = ["c", "c_prev", "bias", "lhs_input", "lhs_weights", "rhs_input", "rhs_weights"];
    Rule::new("lstm_cell", cell(), &reads, build)
}

/// Replaces unrolled LSTM cells with `Lstm` nodes.
#[derive(Debug, Clone)]
pub struct LstmFusion {
    rules: Vec<Rule>,
}

impl LstmFusion {
    pub fn new() -> Result<Self> {
        Ok(Self { rules: vec![lstm_cell()?] })
    }
}

impl GraphPass for LstmFusion {
    fn name(&self) -> &str {
        "lstm_fusion"
    }

    #[tracing::instrument(skip_all)]
    fn run(&self, graph: &mut Graph) -> Result<PassReport> {
        graph_rewrite(graph, &self.rules, Traversal::ProducersFirst)
    }
}
