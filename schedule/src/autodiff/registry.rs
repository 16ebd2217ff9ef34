use std::collections::HashMap;

use enumset::EnumSet;
use smallvec::SmallVec;

use graft_ir::{BinaryOp, Graph, NodeId, OpKey, OpKind, Output, Result, UnaryOp};

use super::{fused, rules};
use crate::fusion::FusionFamily;

/// Input deltas produced by one gradient rule, one entry per input.
///
/// `None` means the input receives no contribution from this node.
pub type Deltas = SmallVec<[Option<Output>; 4]>;

/// Gradient rule of one operator.
///
/// Receives the node and the accumulated delta of each of its output slots
/// (`None` for slots nothing flowed into), and appends the nodes computing
/// the delta of each input to the graph.
pub type GradientFn = fn(&mut Graph, NodeId, &[Option<Output>]) -> Result<Deltas>;

/// Gradient rules keyed by operator.
#[derive(Debug, Clone, Default)]
pub struct GradientRegistry {
    rules: HashMap<OpKey, GradientFn>,
}

impl GradientRegistry {
    /// Registry without any rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for every primitive operator that has a gradient.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(UnaryOp::Neg, rules::neg)
            .register(UnaryOp::Abs, rules::abs)
            .register(UnaryOp::Exp, rules::exp)
            .register(UnaryOp::Log, rules::log)
            .register(UnaryOp::Sqrt, rules::sqrt)
            .register(UnaryOp::Tanh, rules::tanh)
            .register(UnaryOp::Sigmoid, rules::sigmoid)
            .register(UnaryOp::Relu, rules::relu)
            .register(BinaryOp::Add, rules::add)
            .register(BinaryOp::Sub, rules::sub)
            .register(BinaryOp::Mul, rules::mul)
            .register(BinaryOp::Div, rules::div)
            .register(OpKind::Dot, rules::dot)
            .register(OpKind::Reshape, rules::reshape)
            .register(OpKind::Broadcast, rules::broadcast)
            .register(OpKind::Sum, rules::sum)
            .register(OpKind::Slice, rules::slice)
            .register(OpKind::Pad, rules::pad)
            .register(OpKind::GetOutputElement, rules::get_output_element)
            .register(OpKind::Convolution, rules::convolution)
            .register(OpKind::BatchNorm, rules::batch_norm);
        registry
    }

    /// Defaults plus the fused operators of `families` that carry a
    /// gradient.
    pub fn with_fusions(families: EnumSet<FusionFamily>) -> Self {
        let mut registry = Self::with_defaults();
        if families.contains(FusionFamily::Differentiable) {
            registry
                .register(OpKind::MatmulBias, fused::matmul_bias)
                .register(OpKind::ConvolutionBias, fused::convolution_bias)
                .register(OpKind::SigmoidMultiply, fused::sigmoid_multiply);
        }
        registry
    }

    /// Registers `rule` for `key`, replacing any earlier rule.
    pub fn register(&mut self, key: impl Into<OpKey>, rule: GradientFn) -> &mut Self {
        self.rules.insert(key.into(), rule);
        self
    }

    pub fn get(&self, key: OpKey) -> Option<GradientFn> {
        self.rules.get(&key).copied()
    }

    pub fn contains(&self, key: impl Into<OpKey>) -> bool {
        self.rules.contains_key(&key.into())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
