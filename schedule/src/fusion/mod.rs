//! Structural fusion rule families.
//!
//! Every rule is data: a [`FusionRule`] variant selects a pattern and a plain
//! builder function. Rules belong to one or both [`FusionFamily`] values; the
//! differentiable family holds the fused operators autodiff can see through,
//! whose gradients [`GradientRegistry::with_fusions`] registers.
//!
//! [`GradientRegistry::with_fusions`]: crate::autodiff::GradientRegistry::with_fusions

mod activation;
mod conv;
mod matmul;

use enumset::{EnumSet, EnumSetType};
use strum::IntoEnumIterator;

use graft_ir::error::MalformedPatternSnafu;
use graft_ir::rewrite::{Traversal, graph_rewrite};
use graft_ir::{Graph, Output, PassReport, Result, Rule, RuleMatch};

use crate::pass::GraphPass;

/// Named group of fusion rules.
#[derive(Debug, Hash, EnumSetType, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum FusionFamily {
    /// Shape-preserving rewrites for inference graphs.
    Regular,
    /// Fusions that come with a gradient rule for the fused operator.
    Differentiable,
}

/// Every fusion the pass knows, in the order rules are tried at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FusionRule {
    /// `dot(transpose*(a), transpose*(b))` → `MatmulBias` without bias.
    Matmul,
    /// `dot(a, b) + broadcast(bias)` → `MatmulBias`.
    MatmulBias,
    /// `MatmulBias(a, b) + broadcast(bias)` → `MatmulBias` with bias.
    MatmulBiasChain,
    /// `convolution + broadcast(bias)` → `ConvolutionBias`.
    ConvolutionBias,
    /// `relu(ConvolutionBias)` → `ConvolutionBiasRelu`.
    ConvolutionBiasRelu,
    /// `relu(convolution)` → `ConvolutionRelu`.
    ConvolutionRelu,
    /// Zero pad feeding a convolution becomes convolution padding.
    ZeroPaddedConvolution,
    /// Same, with an axis permutation between the pad and the convolution.
    ZeroPaddedReshapedConvolution,
    /// Zero pad feeding a filter gradient becomes its padding.
    ZeroPaddedConvolutionBackpropFilters,
    /// `1 / (1 + exp(-x))` → `sigmoid(x)`.
    Sigmoid,
    /// Sigmoid derivative written out in primitives → `SigmoidBackprop`.
    SigmoidBackprop,
    /// `act(x) * act(y)` with sigmoid/tanh activations → `SigmoidMultiply`.
    SigmoidMultiply,
    /// `relu(batch_norm(..).0)` → `BatchNormRelu`.
    BatchNormRelu,
}

impl FusionRule {
    pub fn families(self) -> EnumSet<FusionFamily> {
        match self {
            Self::MatmulBias | Self::ConvolutionBias | Self::SigmoidMultiply => EnumSet::all(),
            _ => FusionFamily::Regular.into(),
        }
    }

    /// Rules belonging to any of `families`, in trial order.
    pub fn selected(families: EnumSet<FusionFamily>) -> impl Iterator<Item = Self> {
        Self::iter().filter(move |rule| !rule.families().is_disjoint(families))
    }

    /// Pattern and builder of this fusion.
    pub fn rule(self) -> Result<Rule> {
        let name: &'static str = self.into();
        match self {
            Self::Matmul => matmul::matmul(name),
            Self::MatmulBias => matmul::matmul_bias(name),
            Self::MatmulBiasChain => matmul::matmul_bias_chain(name),
            Self::ConvolutionBias => conv::convolution_bias(name),
            Self::ConvolutionBiasRelu => conv::convolution_bias_relu(name),
            Self::ConvolutionRelu => conv::convolution_relu(name),
            Self::ZeroPaddedConvolution => conv::zero_padded(name),
            Self::ZeroPaddedReshapedConvolution => conv::zero_padded_reshaped(name),
            Self::ZeroPaddedConvolutionBackpropFilters => conv::zero_padded_backprop_filters(name),
            Self::Sigmoid => activation::sigmoid(name),
            Self::SigmoidBackprop => activation::sigmoid_backprop(name),
            Self::SigmoidMultiply => activation::sigmoid_multiply(name),
            Self::BatchNormRelu => activation::batch_norm_relu(name),
        }
    }
}

/// Applies the rules of the selected families in one producers-first sweep.
#[derive(Debug, Clone)]
pub struct FusionPass {
    families: EnumSet<FusionFamily>,
    rules: Vec<Rule>,
}

impl FusionPass {
    pub fn new(families: EnumSet<FusionFamily>) -> Result<Self> {
        let rules = FusionRule::selected(families).map(FusionRule::rule).collect::<Result<_>>()?;
        Ok(Self { families, rules })
    }

    pub fn families(&self) -> EnumSet<FusionFamily> {
        self.families
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl GraphPass for FusionPass {
    fn name(&self) -> &str {
        "fusion"
    }

    #[tracing::instrument(skip_all, fields(families = ?self.families))]
    fn run(&self, graph: &mut Graph) -> Result<PassReport> {
        graph_rewrite(graph, &self.rules, Traversal::ProducersFirst)
    }
}

/// `output` feeds exactly one consumer edge and is not a graph result.
pub(crate) fn has_single_use(graph: &Graph, m: &RuleMatch<'_>, output: Output) -> bool {
    m.consumers.uses_of(output).count() + graph.results().iter().filter(|&&r| r == output).count() == 1
}

/// A label bound a node of a kind its pattern cannot produce.
pub(crate) fn unexpected<T>(label: &str) -> Result<T> {
    MalformedPatternSnafu { reason: format!("label `{label}` bound an unexpected operator") }.fail()
}
