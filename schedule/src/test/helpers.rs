//! Shared builders and numeric checks for schedule tests.

use proptest::prelude::Rng;
use proptest::test_runner::{RngAlgorithm, TestRng};

use graft_ir::{DType, Graph, NodeId, Output};

use super::interp::{Tensor, evaluate};
use crate::autodiff::{GradientRegistry, backprop_function};

pub const F32: DType = DType::Float32;

pub fn rng() -> TestRng {
    TestRng::deterministic_rng(RngAlgorithm::ChaCha)
}

/// Uniform values in `[-1, 1)` kept away from zero, so kinks of `relu`,
/// `abs` and friends are not sampled.
pub fn random_tensor(rng: &mut TestRng, shape: &[usize]) -> Tensor {
    let data = (0..shape.iter().product::<usize>())
        .map(|_| {
            let unit = (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
            let value = 2.0 * unit - 1.0;
            if value.abs() < 0.05 { value.signum() * 0.05 + value } else { value }
        })
        .collect();
    Tensor::new(shape, data)
}

/// Random values for every parameter of `graph`.
pub fn random_params(rng: &mut TestRng, graph: &Graph) -> Vec<Tensor> {
    graph.parameters().iter().map(|&p| random_tensor(rng, graph.shape(p))).collect()
}

pub fn assert_close(actual: &Tensor, expected: &Tensor, tolerance: f64) {
    assert_eq!(actual.shape, expected.shape, "shapes differ");
    for (i, (&a, &e)) in actual.data.iter().zip(&expected.data).enumerate() {
        // Deep exp chains overflow; both sides must then overflow the same way.
        let same = a == e || (a.is_nan() && e.is_nan());
        assert!(same || (a - e).abs() <= tolerance * e.abs().max(1.0), "element {i}: {a} vs {e}");
    }
}

/// Evaluates `before` and `after` on the same random parameters and checks
/// that every result agrees.
pub fn assert_same_values(before: &Graph, after: &Graph) {
    let params = random_params(&mut rng(), before);
    let expected = evaluate(before, &params);
    let actual = evaluate(after, &params);
    assert_eq!(actual.len(), expected.len());
    for (actual, expected) in actual.iter().zip(&expected) {
        assert_close(actual, expected, 1e-9);
    }
}

/// Compares the gradient of `sum(seed * result)` with respect to the
/// parameters `wrt` against central finite differences.
pub fn check_gradients(graph: &Graph, registry: &GradientRegistry, wrt: &[NodeId]) {
    let gradient_graph = backprop_function(graph, registry, wrt).expect("gradient graph");
    let mut rng = rng();
    let params = random_params(&mut rng, graph);
    let seeds: Vec<Tensor> = graph.results().iter().map(|&r| random_tensor(&mut rng, graph.shape(r))).collect();

    let objective = |params: &[Tensor]| -> f64 {
        evaluate(graph, params)
            .iter()
            .zip(&seeds)
            .map(|(y, seed)| y.data.iter().zip(&seed.data).map(|(a, b)| a * b).sum::<f64>())
            .sum()
    };

    let mut inputs = params.clone();
    inputs.extend(seeds.iter().cloned());
    let symbolic = evaluate(&gradient_graph, &inputs);

    const EPSILON: f64 = 1e-6;
    for (&id, gradient) in wrt.iter().zip(&symbolic) {
        let index = graph.parameters().iter().position(|&p| p == id).expect("wrt must be a parameter");
        for element in 0..params[index].len() {
            let mut plus = params.clone();
            plus[index].data[element] += EPSILON;
            let mut minus = params.clone();
            minus[index].data[element] -= EPSILON;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * EPSILON);
            let analytic = gradient.data[element];
            assert!(
                (numeric - analytic).abs() <= 1e-4 * numeric.abs().max(1.0),
                "d/d{id}[{element}]: symbolic {analytic}, numeric {numeric}"
            );
        }
    }
}

/// Weights and bias shared by the cells of one LSTM layer.
#[derive(Debug, Clone, Copy)]
pub struct LstmWeights {
    pub w_layer: NodeId,
    pub w_iter: NodeId,
    pub bias: NodeId,
    pub hidden: usize,
    /// Write `dot(h, w_iter) + dot(x, w_layer)` instead of the input
    /// projection first.
    pub recurrent_first: bool,
}

impl LstmWeights {
    pub fn new(graph: &mut Graph, features: usize, hidden: usize) -> Self {
        Self {
            w_layer: graph.parameter(F32, &[features, 4 * hidden]),
            w_iter: graph.parameter(F32, &[hidden, 4 * hidden]),
            bias: graph.parameter(F32, &[4 * hidden]),
            hidden,
            recurrent_first: false,
        }
    }

    pub fn recurrent_first(self, recurrent_first: bool) -> Self {
        Self { recurrent_first, ..self }
    }
}

/// One LSTM cell written out in primitive operators. Returns `(h, c)`.
pub fn unrolled_cell(graph: &mut Graph, weights: LstmWeights, x: Output, h: Output, c: Output) -> (Output, Output) {
    let batch = graph.shape(x)[0];
    let hidden = weights.hidden;
    let layer = graph.dot(x, weights.w_layer).unwrap();
    let iter = graph.dot(h, weights.w_iter).unwrap();
    let projections = if weights.recurrent_first { graph.add(iter, layer) } else { graph.add(layer, iter) }.unwrap();
    let bias = graph.broadcast(weights.bias, &[batch, 4 * hidden], &[0]).unwrap();
    let gates = graph.add(projections, bias).unwrap();

    let mut gate = |k: usize| graph.slice(gates, &[0, k * hidden], &[batch, (k + 1) * hidden]).unwrap();
    let (i, f, g, o) = (gate(0), gate(1), gate(2), gate(3));
    let (i, f, o) = (graph.sigmoid(i).unwrap(), graph.sigmoid(f).unwrap(), graph.sigmoid(o).unwrap());
    let g = graph.tanh(g).unwrap();

    let keep = graph.mul(f, c).unwrap();
    let write = graph.mul(i, g).unwrap();
    let c_next = graph.add(keep, write).unwrap();
    let squashed = graph.tanh(c_next).unwrap();
    let h_next = graph.mul(o, squashed).unwrap();
    (h_next.output(0), c_next.output(0))
}
