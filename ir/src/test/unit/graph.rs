use graft_dtype::DType;
use test_case::test_case;

use crate::{BinaryOp, ConstValue, ConvAttrs, Error, Graph, Op, OpKind, Output, TensorType};

fn f32(shape: &[usize]) -> TensorType {
    TensorType::new(DType::Float32, shape)
}

#[test]
fn test_parameters_are_indexed_in_creation_order() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[2]);
    let b = g.parameter(DType::Int32, &[3]);
    assert_eq!(g.parameters(), &[a, b]);
    assert_eq!(g.op(b), &Op::Parameter { index: 1 });
    assert_eq!(g.node(b).output_type(0), &TensorType::new(DType::Int32, &[3]));
}

#[test]
fn test_binary_requires_identical_types() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[2, 3]);
    let b = g.parameter(DType::Float32, &[3, 2]);
    let c = g.parameter(DType::Float64, &[2, 3]);

    let err = g.add(a, b).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { ref expected, ref actual, .. } if *expected == f32(&[2, 3]) && *actual == f32(&[3, 2])));
    assert!(matches!(g.mul(a, c), Err(Error::ShapeMismatch { .. })));
    let max = g.binary(BinaryOp::Max, a, a).unwrap();
    assert_eq!(g.node(max).shape().as_slice(), &[2, 3]);
}

#[test]
fn test_dot_shapes() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[4, 3]);
    let b = g.parameter(DType::Float32, &[3, 5]);
    let d = g.dot(a, b).unwrap();
    assert_eq!(g.shape(d).as_slice(), &[4, 5]);
    assert!(matches!(g.dot(b, a), Err(Error::DotShape { .. })));
}

#[test_case(&[1, 0], &[3, 2] ; "transpose")]
#[test_case(&[0, 1], &[6] ; "flatten")]
#[test_case(&[0, 1], &[1, 6] ; "unsqueeze")]
fn test_reshape_accepts(order: &[usize], shape: &[usize]) {
    let mut g = Graph::new();
    let x = g.parameter(DType::Float32, &[2, 3]);
    let r = g.reshape(x, order, shape).unwrap();
    assert_eq!(g.shape(r).as_slice(), shape);
}

#[test]
fn test_reshape_rejects_bad_order_and_size() {
    let mut g = Graph::new();
    let x = g.parameter(DType::Float32, &[2, 3]);
    assert!(matches!(g.reshape(x, &[0, 0], &[2, 3]), Err(Error::InvalidPermutation { .. })));
    assert!(matches!(g.reshape(x, &[0, 1], &[5]), Err(Error::ReshapeSize { input: 6, output: 5 })));
}

#[test]
fn test_broadcast_and_sum() {
    let mut g = Graph::new();
    let bias = g.parameter(DType::Float32, &[5]);
    let b = g.broadcast(bias, &[4, 5], &[0]).unwrap();
    assert_eq!(g.shape(b).as_slice(), &[4, 5]);
    assert!(matches!(g.broadcast(bias, &[5, 4], &[0]), Err(Error::ShapeMismatch { .. })));

    let s = g.sum(b, &[0]).unwrap();
    assert_eq!(g.shape(s).as_slice(), &[5]);
    assert!(matches!(g.sum(b, &[1, 0]), Err(Error::InvalidAxes { .. })));
}

#[test]
fn test_pad_and_slice() {
    let mut g = Graph::new();
    let x = g.parameter(DType::Float32, &[1, 2, 4, 4]);
    let zero = g.scalar(0.0f32, &[]);
    let p = g.pad(x, zero, &[0, 0, 1, 1], &[0, 0, 2, 2]).unwrap();
    assert_eq!(g.shape(p).as_slice(), &[1, 2, 7, 7]);

    let wrong_value = g.scalar(0.0f32, &[1]);
    assert!(matches!(g.pad(x, wrong_value, &[0; 4], &[0; 4]), Err(Error::ShapeMismatch { .. })));

    let s = g.slice(x, &[0, 1, 0, 2], &[1, 2, 4, 4]).unwrap();
    assert_eq!(g.shape(s).as_slice(), &[1, 1, 4, 2]);
    assert!(matches!(g.slice(x, &[0, 0, 0, 3], &[1, 2, 4, 5]), Err(Error::SliceBounds { dim: 3, .. })));
}

#[test_case(&[1, 1, 5, 5], &[2, 1, 3, 3], ConvAttrs::unit(2), &[1, 2, 3, 3] ; "valid")]
#[test_case(&[1, 1, 5, 5], &[2, 1, 3, 3], ConvAttrs::unit(2).with_padding(&[1, 1], &[1, 1]), &[1, 2, 5, 5] ; "same")]
#[test_case(&[2, 3, 7, 7], &[4, 3, 3, 3], ConvAttrs::unit(2).with_strides(&[2, 2]), &[2, 4, 3, 3] ; "strided")]
fn test_convolution_shapes(data: &[usize], filters: &[usize], attrs: ConvAttrs, expected: &[usize]) {
    let mut g = Graph::new();
    let d = g.parameter(DType::Float32, data);
    let f = g.parameter(DType::Float32, filters);
    let c = g.convolution(d, f, attrs).unwrap();
    assert_eq!(g.shape(c).as_slice(), expected);
}

#[test]
fn test_convolution_channel_mismatch() {
    let mut g = Graph::new();
    let d = g.parameter(DType::Float32, &[1, 2, 5, 5]);
    let f = g.parameter(DType::Float32, &[2, 3, 3, 3]);
    assert!(matches!(g.convolution(d, f, ConvAttrs::unit(2)), Err(Error::ConvolutionShape { .. })));
}

#[test]
fn test_batch_norm_has_three_outputs() {
    let mut g = Graph::new();
    let gamma = g.parameter(DType::Float32, &[3]);
    let beta = g.parameter(DType::Float32, &[3]);
    let input = g.parameter(DType::Float32, &[2, 3, 4, 4]);
    let bn = g.batch_norm(1e-3, gamma, beta, input).unwrap();
    let outputs = g.node(bn).outputs();
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0], f32(&[2, 3, 4, 4]));
    assert_eq!(outputs[2], f32(&[3]));

    let mean = g.get_output_element(bn, 1).unwrap();
    assert_eq!(g.node(mean).input(0), Output::new(bn, 1));
    assert!(matches!(g.get_output_element(bn, 3), Err(Error::UnknownOutput { .. })));
}

#[test]
fn test_add_node_checks_arity() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[2]);
    let err = g.add_node(Op::Dot, [a.output(0)], [f32(&[2])]).unwrap_err();
    assert!(matches!(err, Error::ArityMismatch { expected: 2, actual: 1, .. }));
}

#[test]
fn test_lstm_and_rnn_types() {
    let mut g = Graph::new();
    let (batch, features, hidden) = (2, 3, 4);
    let x = g.parameter(DType::Float32, &[batch, features]);
    let h = g.parameter(DType::Float32, &[batch, hidden]);
    let c = g.parameter(DType::Float32, &[batch, hidden]);
    let wl = g.parameter(DType::Float32, &[features, 4 * hidden]);
    let wi = g.parameter(DType::Float32, &[hidden, 4 * hidden]);
    let b = g.parameter(DType::Float32, &[4 * hidden]);
    let [x, h, c, wl, wi, b] = [x, h, c, wl, wi, b].map(Output::from);

    let cell = g.lstm(x, h, c, wl, wi, b).unwrap();
    assert_eq!(g.node(cell).outputs(), &[f32(&[batch, hidden]), f32(&[batch, hidden])]);

    let rnn = g.rnn(wl, wi, b, h, c, &[x, x, x]).unwrap();
    assert_eq!(g.op(rnn), &Op::Rnn { timesteps: 3 });
    assert_eq!(g.node(rnn).outputs().len(), 6);
    assert_eq!(g.node(rnn).inputs().len(), 8);
    assert!(matches!(g.lstm(x, h, c, wi, wi, b), Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_toposort_visits_producers_first_in_input_order() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[2]);
    let b = g.parameter(DType::Float32, &[2]);
    let unused = g.exp(a).unwrap();
    let ab = g.add(a, b).unwrap();
    let n = g.neg(ab).unwrap();
    let m = g.mul(n, ab).unwrap();
    g.add_result(m).unwrap();

    assert_eq!(g.toposort(), vec![a, b, ab, n, m]);
    assert!(!g.toposort().contains(&unused));
    assert_eq!(g.count_live(BinaryOp::Add), 1);
    assert_eq!(g.find_live(OpKind::Parameter), vec![a, b]);
}

#[test_case(ConstValue::Float(1.5), DType::Float32, true ; "float into float")]
#[test_case(ConstValue::Float(1.5), DType::Int32, false ; "float into int")]
#[test_case(ConstValue::Int(-2), DType::UInt8, false ; "signed into unsigned")]
#[test_case(ConstValue::Bool(true), DType::Bool, true ; "bool into bool")]
fn test_constant_value_must_fit_dtype(value: ConstValue, dtype: DType, fits: bool) {
    let mut g = Graph::new();
    match g.constant(value, dtype, &[2]) {
        Ok(id) => {
            assert!(fits);
            assert_eq!(g.op(id), &Op::Constant(value));
            assert_eq!(g.node(id).output_type(0), &TensorType::new(dtype, &[2]));
        }
        Err(error) => {
            assert!(!fits);
            assert_eq!(error, Error::ConstantType { value, dtype });
        }
    }
    assert_eq!(g.len(), usize::from(fits));
}
