use graft_ir::{Graph, Op, OpKind};

use crate::pass::GraphPass;
use crate::reshape::ReshapeElimination;
use crate::test::helpers::{F32, assert_same_values};

fn eliminate(graph: &mut Graph) -> graft_ir::PassReport {
    let before = graph.clone();
    let report = ReshapeElimination::new().unwrap().run(graph).unwrap();
    assert_same_values(&before, graph);
    report
}

#[test]
fn test_identity_reshape_is_removed() {
    let mut g = Graph::new();
    let x = g.parameter(F32, &[2, 3]);
    let r = g.reshape(x, &[0, 1], &[2, 3]).unwrap();
    let y = g.relu(r).unwrap();
    g.add_result(y).unwrap();

    let report = eliminate(&mut g);

    assert_eq!(report.count("identity_reshape"), 1);
    assert_eq!(g.count_live(OpKind::Reshape), 0);
    assert_eq!(g.node(y).input(0), x.output(0));
}

#[test]
fn test_regrouping_reshape_is_kept() {
    let mut g = Graph::new();
    let x = g.parameter(F32, &[2, 3]);
    let r = g.reshape(x, &[0, 1], &[6]).unwrap();
    g.add_result(r).unwrap();

    let report = eliminate(&mut g);

    assert_eq!(report.applied_count(), 0);
    assert_eq!(g.count_live(OpKind::Reshape), 1);
}

#[test]
fn test_transposes_cancel() {
    let mut g = Graph::new();
    let x = g.parameter(F32, &[2, 3]);
    let t1 = g.transpose(x).unwrap();
    let t2 = g.transpose(t1).unwrap();
    let y = g.neg(t2).unwrap();
    g.add_result(y).unwrap();

    let report = eliminate(&mut g);

    assert_eq!(report.count("reshape_of_reshape"), 1);
    assert_eq!(g.count_live(OpKind::Reshape), 0);
    assert_eq!(g.node(y).input(0), x.output(0));
}

#[test]
fn test_permutations_compose() {
    let mut g = Graph::new();
    let x = g.parameter(F32, &[2, 3, 4]);
    let p1 = g.reshape(x, &[1, 2, 0], &[3, 4, 2]).unwrap();
    let p2 = g.reshape(p1, &[2, 0, 1], &[2, 3, 4]).unwrap();
    let p3 = g.reshape(p2, &[0, 2, 1], &[2, 4, 3]).unwrap();
    g.add_result(p3).unwrap();

    eliminate(&mut g);

    let reshapes = g.find_live(OpKind::Reshape);
    assert_eq!(reshapes.len(), 1);
    let node = g.node(reshapes[0]);
    assert_eq!(node.input(0), x.output(0));
    assert!(matches!(node.op(), Op::Reshape { input_order } if input_order.as_slice() == [0, 2, 1]));
}

#[test]
fn test_regroup_chain_collapses() {
    let mut g = Graph::new();
    let x = g.parameter(F32, &[2, 3, 4]);
    let r1 = g.reshape(x, &[0, 1, 2], &[6, 4]).unwrap();
    let r2 = g.reshape(r1, &[0, 1], &[24]).unwrap();
    g.add_result(r2).unwrap();

    eliminate(&mut g);

    let reshapes = g.find_live(OpKind::Reshape);
    assert_eq!(reshapes.len(), 1);
    assert_eq!(g.node(reshapes[0]).input(0), x.output(0));
    assert_eq!(g.shape(g.results()[0]).as_slice(), &[24]);
}

#[test]
fn test_permutation_then_regroup_keeps_order() {
    let mut g = Graph::new();
    let x = g.parameter(F32, &[2, 3]);
    let t = g.transpose(x).unwrap();
    let flat = g.reshape(t, &[0, 1], &[6]).unwrap();
    g.add_result(flat).unwrap();

    eliminate(&mut g);

    let reshapes = g.find_live(OpKind::Reshape);
    assert_eq!(reshapes.len(), 1);
    assert!(matches!(g.op(reshapes[0]), Op::Reshape { input_order } if input_order.as_slice() == [1, 0]));
}

#[test]
fn test_shared_inner_reshape_survives_for_other_consumers() {
    let mut g = Graph::new();
    let x = g.parameter(F32, &[2, 3]);
    let t = g.transpose(x).unwrap();
    let back = g.transpose(t).unwrap();
    let y = g.neg(back).unwrap();
    g.set_results([y.output(0), t.output(0)]).unwrap();

    eliminate(&mut g);

    assert_eq!(g.node(y).input(0), x.output(0));
    assert_eq!(g.results()[1], t.output(0));
    assert_eq!(g.count_live(OpKind::Reshape), 1);
}
