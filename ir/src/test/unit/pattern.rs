use graft_dtype::DType;

use crate::pattern::predicate::{RESHAPE, TRANSPOSE};
use crate::{BinaryOp, Error, Graph, Matcher, OpKey, OpKind, Output, Pattern, TensorType, UnaryOp};

fn x() -> Pattern {
    Pattern::label("x")
}

#[test]
fn test_label_binds_once_and_requires_identity() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[3]);
    let b = g.parameter(DType::Float32, &[3]);
    let same = g.add(a, a).unwrap();
    let different = g.add(a, b).unwrap();

    let pattern = Pattern::binary(BinaryOp::Add, x(), x());
    let mut matcher = Matcher::new(&g);
    assert!(matcher.try_match(&pattern, same));
    assert_eq!(matcher.bindings().get("x"), Some(Output::from(a)));
    assert!(!matcher.try_match(&pattern, different));
    assert!(matcher.bindings().is_empty());
}

#[test]
fn test_typed_label() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[3]);
    let n = g.neg(a).unwrap();

    let f32_vec = Pattern::unary(UnaryOp::Neg, x().typed(TensorType::new(DType::Float32, &[3])));
    let f64_vec = Pattern::unary(UnaryOp::Neg, x().typed(TensorType::new(DType::Float64, &[3])));
    assert!(f32_vec.match_first(&g, n.output(0)).is_some());
    assert!(f64_vec.match_first(&g, n.output(0)).is_none());
}

#[test]
fn test_skip_looks_through_chains() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[2, 3]);
    let r1 = g.reshape(a, &[0, 1], &[3, 2]).unwrap();
    let r2 = g.reshape(r1, &[0, 1], &[6]).unwrap();
    let e = g.exp(r2).unwrap();
    let direct = g.exp(a).unwrap();

    let pattern = Pattern::unary(UnaryOp::Exp, Pattern::skip_if(RESHAPE, Pattern::op(OpKind::Parameter, vec![]).named("p")));
    let chained = pattern.match_first(&g, e.output(0)).unwrap();
    assert_eq!(chained.get("p"), Some(Output::from(a)));
    let plain = pattern.match_first(&g, direct.output(0)).unwrap();
    assert_eq!(plain.get("p"), Some(Output::from(a)));

    // transpose predicate rejects layout-only reshapes
    let transposes = Pattern::unary(UnaryOp::Exp, Pattern::skip_if(TRANSPOSE, Pattern::op(OpKind::Parameter, vec![])));
    assert!(transposes.match_first(&g, e.output(0)).is_none());
}

#[test]
fn test_skip_without_predicate_is_malformed() {
    let pattern = Pattern::unary(UnaryOp::Exp, Pattern::skip(x()));
    assert!(matches!(pattern.validate(), Err(Error::MalformedPattern { .. })));
    assert!(pattern.clone().validate().is_err());
    assert!(Pattern::unary(UnaryOp::Exp, Pattern::skip(x()).with_predicate(RESHAPE)).validate().is_ok());
    assert!(matches!(Pattern::label("").validate(), Err(Error::MalformedPattern { .. })));
    assert!(matches!(Pattern::any(vec![]).validate(), Err(Error::MalformedPattern { .. })));
}

#[test]
fn test_commutative_tie_break_prefers_unswapped() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[3]);
    let b = g.parameter(DType::Float32, &[3]);
    let sum = g.add(a, b).unwrap();

    let m = Pattern::binary(BinaryOp::Add, Pattern::label("l"), Pattern::label("r")).match_first(&g, sum.output(0)).unwrap();
    assert_eq!((m.get("l"), m.get("r")), (Some(a.output(0)), Some(b.output(0))));
}

#[test]
fn test_commutative_falls_back_to_swapped() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[3]);
    let b = g.parameter(DType::Float32, &[3]);
    let e = g.exp(b).unwrap();
    let prod = g.mul(a, e).unwrap();

    let pattern = Pattern::binary(BinaryOp::Mul, Pattern::unary(UnaryOp::Exp, x()), Pattern::label("y"));
    let m = pattern.match_first(&g, prod.output(0)).unwrap();
    assert_eq!(m.get("x"), Some(b.output(0)));
    assert_eq!(m.get("y"), Some(a.output(0)));
}

#[test]
fn test_sub_stays_positional() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[3]);
    let b = g.parameter(DType::Float32, &[3]);
    let e = g.exp(b).unwrap();
    let diff = g.sub(a, e).unwrap();

    let exp_first = Pattern::binary(BinaryOp::Sub, Pattern::unary(UnaryOp::Exp, x()), Pattern::label("y"));
    assert!(exp_first.match_first(&g, diff.output(0)).is_none());
    let exp_second = Pattern::binary(BinaryOp::Sub, Pattern::label("y"), Pattern::unary(UnaryOp::Exp, x()));
    assert!(exp_second.match_first(&g, diff.output(0)).is_some());
}

#[test]
fn test_any_and_multi_key_ops() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[3]);
    let t = g.tanh(a).unwrap();
    let s = g.sigmoid(a).unwrap();
    let r = g.relu(a).unwrap();

    let either = Pattern::any(vec![Pattern::unary(UnaryOp::Tanh, x()), Pattern::unary(UnaryOp::Sigmoid, x())]);
    assert!(either.match_first(&g, t.output(0)).is_some());
    assert!(either.match_first(&g, s.output(0)).is_some());
    assert!(either.match_first(&g, r.output(0)).is_none());

    let keys = Pattern::ops([OpKey::from(UnaryOp::Tanh), OpKey::from(UnaryOp::Relu)], vec![x()]);
    assert!(keys.match_first(&g, r.output(0)).is_some());
    assert!(keys.match_first(&g, s.output(0)).is_none());
}

#[test]
fn test_slot_and_named_bindings() {
    let mut g = Graph::new();
    let gamma = g.parameter(DType::Float32, &[2]);
    let beta = g.parameter(DType::Float32, &[2]);
    let input = g.parameter(DType::Float32, &[1, 2, 3, 3]);
    let bn = g.batch_norm(1e-5, gamma, beta, input).unwrap();
    let mean = g.get_output_element(bn, 1).unwrap();

    let bn_pattern = |slot| {
        Pattern::op(OpKind::GetOutputElement, vec![Pattern::op(OpKind::BatchNorm, vec![x(), x(), x()]).at_slot(slot).named("bn")])
    };
    // gamma and beta are distinct, so `x` cannot bind all three inputs
    assert!(bn_pattern(1).match_first(&g, mean.output(0)).is_none());

    let typed = Pattern::op(
        OpKind::GetOutputElement,
        vec![Pattern::op(OpKind::BatchNorm, vec![x(), Pattern::label("b"), Pattern::label("i")]).at_slot(1).named("bn")],
    );
    let m = typed.match_first(&g, mean.output(0)).unwrap();
    assert_eq!(m.get("bn"), Some(bn.output(1)));
    assert_eq!(m.node("bn").unwrap(), bn);
    assert_eq!(m.get("i"), Some(input.output(0)));

    let wrong_slot = Pattern::op(
        OpKind::GetOutputElement,
        vec![Pattern::op(OpKind::BatchNorm, vec![x(), Pattern::label("b"), Pattern::label("i")]).at_slot(2)],
    );
    assert!(wrong_slot.match_first(&g, mean.output(0)).is_none());
}

#[test]
fn test_unbound_label_lookup_is_malformed() {
    let mut g = Graph::new();
    let a = g.parameter(DType::Float32, &[3]);
    let n = g.neg(a).unwrap();
    let m = Pattern::unary(UnaryOp::Neg, x()).match_first(&g, n.output(0)).unwrap();
    assert!(matches!(m.output("y"), Err(Error::MalformedPattern { .. })));
}

#[test]
fn test_labels_in_first_appearance_order() {
    let pattern = Pattern::binary(
        BinaryOp::Add,
        Pattern::binary(BinaryOp::Mul, Pattern::label("a"), Pattern::label("b")).named("prod"),
        Pattern::label("a"),
    );
    let labels: Vec<String> = pattern.labels().iter().map(|l| l.to_string()).collect();
    assert_eq!(labels, ["prod", "a", "b"]);
}
