//! Reverse-mode adjoint propagation.
//!
//! [`backprop`] walks the nodes between the differentiated inputs and the
//! seeded outputs in reverse topological order. Each visited node hands the
//! deltas of its output slots to the [`GradientFn`] registered for its
//! operator, which appends the delta computation of its inputs to the same
//! graph. Contributions to one output add up.

mod fused;
mod registry;
mod rules;

use std::collections::HashMap;

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use graft_ir::error::{ArityMismatchSnafu, ShapeMismatchSnafu, UnsupportedOperatorSnafu};
use graft_ir::{Graph, NodeId, Output, Result};

pub use registry::{Deltas, GradientFn, GradientRegistry};

/// Per-output adjoints, accumulated as they arrive.
#[derive(Debug, Default)]
struct Adjoints {
    deltas: HashMap<Output, Output>,
}

impl Adjoints {
    fn get(&self, output: Output) -> Option<Output> {
        self.deltas.get(&output).copied()
    }

    fn accumulate(&mut self, graph: &mut Graph, output: Output, delta: Output) -> Result<()> {
        let total = match self.get(output) {
            Some(existing) => graph.add(existing, delta)?.output(0),
            None => delta,
        };
        self.deltas.insert(output, total);
        Ok(())
    }
}

fn expect_same_type(graph: &Graph, context: &str, expected: Output, actual: Output) -> Result<()> {
    let (expected, actual) = (graph.output_type(expected)?, graph.output_type(actual)?);
    ensure!(
        expected == actual,
        ShapeMismatchSnafu { context, expected: expected.clone(), actual: actual.clone() }
    );
    Ok(())
}

/// Nodes in `order` that read one of `wrt`, directly or not, `wrt` included.
fn dependents(graph: &Graph, order: &[NodeId], wrt: &[NodeId]) -> Vec<bool> {
    let mut marked = vec![false; graph.len()];
    for &id in wrt {
        marked[id.index()] = true;
    }
    for &id in order {
        if graph.node(id).inputs().iter().any(|i| marked[i.node.index()]) {
            marked[id.index()] = true;
        }
    }
    marked
}

/// Appends to `graph` the gradient of `outputs` with respect to each of
/// `wrt`, given one seed delta per output.
///
/// Only nodes on a path from a `wrt` node to an output are differentiated;
/// a needed node whose operator has no rule in `registry` fails with
/// `UnsupportedOperator`. A `wrt` node no output depends on gets a zero
/// gradient.
#[tracing::instrument(skip_all, fields(outputs = outputs.len(), wrt = wrt.len()))]
pub fn backprop(
    graph: &mut Graph,
    registry: &GradientRegistry,
    outputs: &[Output],
    seeds: &[Output],
    wrt: &[NodeId],
) -> Result<HashMap<NodeId, Output>> {
    ensure!(
        seeds.len() == outputs.len(),
        ArityMismatchSnafu { context: "backprop seeds", expected: outputs.len(), actual: seeds.len() }
    );
    for (&output, &seed) in outputs.iter().zip(seeds) {
        expect_same_type(graph, "backprop seed", output, seed)?;
    }
    for &id in wrt {
        graph.output_type(id.output(0))?;
    }

    let order = graph.toposort_from(outputs);
    let depends = dependents(graph, &order, wrt);
    let mut adjoints = Adjoints::default();
    for (&output, &seed) in outputs.iter().zip(seeds) {
        if depends[output.node.index()] {
            adjoints.accumulate(graph, output, seed)?;
        }
    }

    let mut visited = 0usize;
    for &id in order.iter().rev() {
        let node = graph.node(id);
        if !depends[id.index()] || !node.inputs().iter().any(|i| depends[i.node.index()]) {
            continue;
        }
        let slots: SmallVec<[Option<Output>; 4]> = (0..node.outputs().len()).map(|s| adjoints.get(id.output(s))).collect();
        if slots.iter().all(Option::is_none) {
            continue;
        }

        let key = node.key();
        let rule = registry.get(key).context(UnsupportedOperatorSnafu { op: key, node: id })?;
        let inputs: SmallVec<[Output; 6]> = node.inputs().iter().copied().collect();
        let input_deltas = rule(graph, id, &slots)?;
        ensure!(
            input_deltas.len() == inputs.len(),
            ArityMismatchSnafu { context: format!("gradient of {key}"), expected: inputs.len(), actual: input_deltas.len() }
        );

        for (&input, delta) in inputs.iter().zip(input_deltas) {
            let Some(delta) = delta else {
                continue;
            };
            expect_same_type(graph, &format!("gradient of {key}"), input, delta)?;
            if depends[input.node.index()] {
                adjoints.accumulate(graph, input, delta)?;
            }
        }
        visited += 1;
    }

    let mut gradients = HashMap::with_capacity(wrt.len());
    for &id in wrt {
        let gradient = match adjoints.get(id.output(0)) {
            Some(delta) => delta,
            None => graph.zeros_like(id)?.output(0),
        };
        gradients.insert(id, gradient);
    }
    tracing::debug!(visited, nodes = graph.len(), "backprop complete");
    Ok(gradients)
}

/// Gradient graph of `graph` with respect to `wrt`.
///
/// The result takes the original parameters followed by one seed parameter
/// per original result, and returns one gradient per `wrt` node in order.
pub fn backprop_function(graph: &Graph, registry: &GradientRegistry, wrt: &[NodeId]) -> Result<Graph> {
    let mut gradient = graph.clone();
    let outputs = graph.results().to_vec();
    let mut seeds = Vec::with_capacity(outputs.len());
    for &output in &outputs {
        let ty = graph.output_type(output)?;
        seeds.push(gradient.parameter(ty.dtype, &ty.shape).output(0));
    }

    let deltas = backprop(&mut gradient, registry, &outputs, &seeds, wrt)?;
    let results: Vec<Output> = wrt.iter().filter_map(|id| deltas.get(id).copied()).collect();
    gradient.set_results(results)?;
    Ok(gradient)
}
