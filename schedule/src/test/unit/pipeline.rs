use enumset::EnumSet;

use graft_ir::{Graph, Op, OpKind, Output};

use crate::config::PipelineConfig;
use crate::fusion::FusionFamily;
use crate::pass::Pipeline;
use crate::test::helpers::{F32, LstmWeights, assert_same_values, unrolled_cell};

#[test]
fn test_default_pass_order() {
    let pipeline = Pipeline::from_config(&PipelineConfig::default()).unwrap();
    assert_eq!(pipeline.names(), ["reshape_elimination", "lstm_fusion", "rnn_fusion", "rnn_mat_fusion", "fusion"]);
}

#[test]
fn test_disabled_passes_are_left_out() {
    let config = PipelineConfig::builder().recurrent(false).fusions(EnumSet::empty()).build();
    let pipeline = Pipeline::from_config(&config).unwrap();
    assert_eq!(pipeline.names(), ["reshape_elimination"]);

    let config = PipelineConfig::builder().reshape_elimination(false).recurrent(false).fusions(EnumSet::empty()).build();
    assert!(Pipeline::from_config(&config).unwrap().is_empty());
}

#[test]
fn test_layer_and_projection_fuse_end_to_end() {
    let mut g = Graph::new();
    let weights = LstmWeights::new(&mut g, 3, 2);
    let mut h = g.parameter(F32, &[2, 2]).output(0);
    let mut c = g.parameter(F32, &[2, 2]).output(0);
    for _ in 0..3 {
        let x = g.parameter(F32, &[2, 3]).output(0);
        (h, c) = unrolled_cell(&mut g, weights, x, h, c);
    }

    let a = g.parameter(F32, &[2, 2]);
    let w = g.parameter(F32, &[2, 5]);
    let bias = g.parameter(F32, &[5]);
    let at = g.transpose(a).unwrap();
    let identity = g.reshape(at, &[0, 1], &[2, 2]).unwrap();
    let hidden = g.add(h, identity).unwrap();
    let product = g.dot(hidden, w).unwrap();
    let broadcast = g.broadcast(bias, &[2, 5], &[0]).unwrap();
    let out = g.add(product, broadcast).unwrap();
    let result: Output = out.output(0);
    g.set_results([result, c]).unwrap();
    let before = g.clone();

    let report = Pipeline::from_config(&PipelineConfig::default()).unwrap().run(&mut g).unwrap();

    assert_eq!(report.count("identity_reshape"), 1);
    assert_eq!(report.count("lstm_cell"), 3);
    assert_eq!(report.count("rnn"), 1);
    assert_eq!(report.count("matmul_bias"), 1);
    assert!(report.rejected.is_empty());

    let layers = g.find_live(OpKind::Rnn);
    assert_eq!(layers.len(), 1);
    assert_eq!(g.op(layers[0]), &Op::Rnn { timesteps: 3 });
    assert_eq!(g.count_live(OpKind::MatmulBias), 1);
    assert_eq!(g.count_live(OpKind::Dot), 0);
    assert_eq!(g.results()[1], layers[0].output(5));
    assert_same_values(&before, &g);
}

#[test]
fn test_differentiable_pipeline_keeps_plain_relu() {
    let mut g = Graph::new();
    let a = g.parameter(F32, &[2, 3]);
    let b = g.parameter(F32, &[3, 4]);
    let bias = g.parameter(F32, &[4]);
    let product = g.dot(a, b).unwrap();
    let broadcast = g.broadcast(bias, &[2, 4], &[0]).unwrap();
    let sum = g.add(broadcast, product).unwrap();
    let y = g.relu(sum).unwrap();
    g.add_result(y).unwrap();

    let config = PipelineConfig::builder().fusions(FusionFamily::Differentiable.into()).build();
    Pipeline::from_config(&config).unwrap().run(&mut g).unwrap();

    assert_eq!(g.count_live(OpKind::MatmulBias), 1);
    assert_eq!(g.count_live(graft_ir::UnaryOp::Relu), 1);
}
