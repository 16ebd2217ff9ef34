//! Typed node constructors.
//!
//! Each constructor infers output types from its inputs and refuses to build
//! an ill-typed node.

use graft_dtype::DType;
use smallvec::smallvec;
use snafu::ensure;

use super::{Graph, NodeId, Output, TensorType};
use crate::error::*;
use crate::op::Op;
use crate::shape::{self, Shape};
use crate::types::{Activation, BinaryOp, ConstValue, ConvAttrs, IntoConst, UnaryOp};

impl Graph {
    fn tensor(&self, output: impl Into<Output>) -> Result<TensorType> {
        self.output_type(output.into()).cloned()
    }

    fn expect_type(&self, context: &str, output: Output, expected: &TensorType) -> Result<()> {
        let actual = self.tensor(output)?;
        ensure!(actual == *expected, ShapeMismatchSnafu { context, expected: expected.clone(), actual });
        Ok(())
    }

    fn expect_dtype(&self, context: &str, output: Output, dtype: DType) -> Result<TensorType> {
        let actual = self.tensor(output)?;
        ensure!(
            actual.dtype == dtype,
            ShapeMismatchSnafu { context, expected: TensorType { dtype, shape: actual.shape.clone() }, actual }
        );
        Ok(actual)
    }

    fn expect_shape(&self, context: &str, output: Output, dtype: DType, shape: &[usize]) -> Result<()> {
        self.expect_type(context, output, &TensorType::new(dtype, shape))
    }

    // =========================================================================
    // Leaves
    // =========================================================================

    pub fn parameter(&mut self, dtype: DType, shape: &[usize]) -> NodeId {
        let index = self.parameters().len();
        self.push(Op::Parameter { index }, [], [TensorType::new(dtype, shape)])
    }

    fn splat(&mut self, value: ConstValue, dtype: DType, shape: &[usize]) -> NodeId {
        self.push(Op::Constant(value), [], [TensorType::new(dtype, shape)])
    }

    /// Splat of `value`, which must be representable in `dtype`.
    pub fn constant(&mut self, value: ConstValue, dtype: DType, shape: &[usize]) -> Result<NodeId> {
        ensure!(value.fits(dtype), ConstantTypeSnafu { value, dtype });
        Ok(self.splat(value, dtype, shape))
    }

    pub fn scalar<T: IntoConst>(&mut self, value: T, shape: &[usize]) -> NodeId {
        self.splat(value.into_const(), T::DTYPE, shape)
    }

    /// Rank-0 zero of `dtype`.
    pub fn zero(&mut self, dtype: DType) -> NodeId {
        self.splat(ConstValue::zero(dtype), dtype, &[])
    }

    pub fn zeros_like(&mut self, output: impl Into<Output>) -> Result<NodeId> {
        let ty = self.tensor(output)?;
        Ok(self.splat(ConstValue::zero(ty.dtype), ty.dtype, &ty.shape))
    }

    pub fn ones_like(&mut self, output: impl Into<Output>) -> Result<NodeId> {
        let ty = self.tensor(output)?;
        Ok(self.splat(ConstValue::one(ty.dtype), ty.dtype, &ty.shape))
    }

    /// Appends a node whose inputs are already known to be valid.
    fn push<const I: usize, const O: usize>(&mut self, op: Op, inputs: [Output; I], outputs: [TensorType; O]) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        if let Op::Parameter { .. } = op {
            self.parameters.push(id);
        }
        self.nodes.push(super::Node { id, op, inputs: inputs.into_iter().collect(), outputs: outputs.into_iter().collect() });
        id
    }

    // =========================================================================
    // Elementwise
    // =========================================================================

    pub fn unary(&mut self, op: UnaryOp, x: impl Into<Output>) -> Result<NodeId> {
        let x = x.into();
        let ty = self.tensor(x)?;
        Ok(self.push(Op::Unary(op), [x], [ty]))
    }

    pub fn binary(&mut self, op: BinaryOp, a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeId> {
        let (a, b) = (a.into(), b.into());
        let ty = self.tensor(a)?;
        self.expect_type(&op.to_string(), b, &ty)?;
        Ok(self.push(Op::Binary(op), [a, b], [ty]))
    }

    pub fn neg(&mut self, x: impl Into<Output>) -> Result<NodeId> {
        self.unary(UnaryOp::Neg, x)
    }

    pub fn exp(&mut self, x: impl Into<Output>) -> Result<NodeId> {
        self.unary(UnaryOp::Exp, x)
    }

    pub fn tanh(&mut self, x: impl Into<Output>) -> Result<NodeId> {
        self.unary(UnaryOp::Tanh, x)
    }

    pub fn sigmoid(&mut self, x: impl Into<Output>) -> Result<NodeId> {
        self.unary(UnaryOp::Sigmoid, x)
    }

    pub fn relu(&mut self, x: impl Into<Output>) -> Result<NodeId> {
        self.unary(UnaryOp::Relu, x)
    }

    pub fn add(&mut self, a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeId> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeId> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeId> {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeId> {
        self.binary(BinaryOp::Div, a, b)
    }

    // =========================================================================
    // Linear algebra
    // =========================================================================

    pub fn dot(&mut self, a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeId> {
        let (a, b) = (a.into(), b.into());
        let ta = self.tensor(a)?;
        let tb = self.expect_dtype("dot", b, ta.dtype)?;
        let shape = shape::dot(&ta.shape, &tb.shape)?;
        Ok(self.push(Op::Dot, [a, b], [TensorType { dtype: ta.dtype, shape }]))
    }

    /// `op(a) x op(b) + broadcast(bias)`, where `op` transposes when the
    /// matching flag is set and `bias` is broadcast along `broadcast_axes`.
    pub fn matmul_bias(
        &mut self,
        a: impl Into<Output>,
        b: impl Into<Output>,
        bias: Option<Output>,
        transpose_a: bool,
        transpose_b: bool,
        broadcast_axes: &[usize],
    ) -> Result<NodeId> {
        let (a, b) = (a.into(), b.into());
        let ta = self.tensor(a)?;
        let tb = self.expect_dtype("matmul_bias", b, ta.dtype)?;
        let shape = shape::matmul(&ta.shape, &tb.shape, transpose_a, transpose_b)?;
        let op = Op::MatmulBias { transpose_a, transpose_b, broadcast_axes: broadcast_axes.into() };
        let ty = TensorType { dtype: ta.dtype, shape };
        let Some(bias) = bias else {
            return Ok(self.push(op, [a, b], [ty]));
        };
        let source = shape::broadcast_source(&ty.shape, broadcast_axes)?;
        self.expect_shape("matmul_bias bias", bias, ta.dtype, &source)?;
        Ok(self.push(op, [a, b, bias], [ty]))
    }

    // =========================================================================
    // Movement
    // =========================================================================

    pub fn reshape(&mut self, x: impl Into<Output>, input_order: &[usize], shape: &[usize]) -> Result<NodeId> {
        let x = x.into();
        let tx = self.tensor(x)?;
        shape::reshape(&tx.shape, input_order, shape)?;
        Ok(self.push(Op::Reshape { input_order: input_order.into() }, [x], [TensorType::new(tx.dtype, shape)]))
    }

    /// Rank-2 transpose expressed as a reshape.
    pub fn transpose(&mut self, x: impl Into<Output>) -> Result<NodeId> {
        let x = x.into();
        let tx = self.tensor(x)?;
        ensure!(tx.shape.len() == 2, RankMismatchSnafu { context: "transpose", expected: 2usize, actual: tx.shape.len() });
        let shape = shape::permute(&tx.shape, &[1, 0]);
        self.reshape(x, &[1, 0], &shape)
    }

    pub fn broadcast(&mut self, x: impl Into<Output>, shape: &[usize], axes: &[usize]) -> Result<NodeId> {
        let x = x.into();
        let tx = self.tensor(x)?;
        let source = shape::broadcast_source(shape, axes)?;
        self.expect_shape("broadcast", x, tx.dtype, &source)?;
        Ok(self.push(Op::Broadcast { axes: axes.into() }, [x], [TensorType::new(tx.dtype, shape)]))
    }

    pub fn sum(&mut self, x: impl Into<Output>, axes: &[usize]) -> Result<NodeId> {
        let x = x.into();
        let tx = self.tensor(x)?;
        let shape = shape::remove_axes(&tx.shape, axes)?;
        Ok(self.push(Op::Sum { axes: axes.into() }, [x], [TensorType { dtype: tx.dtype, shape }]))
    }

    pub fn pad(&mut self, x: impl Into<Output>, value: impl Into<Output>, below: &[usize], above: &[usize]) -> Result<NodeId> {
        let (x, value) = (x.into(), value.into());
        let tx = self.tensor(x)?;
        self.expect_shape("pad value", value, tx.dtype, &[])?;
        let shape = shape::pad(&tx.shape, below, above)?;
        let op = Op::Pad { below: below.into(), above: above.into() };
        Ok(self.push(op, [x, value], [TensorType { dtype: tx.dtype, shape }]))
    }

    pub fn slice(&mut self, x: impl Into<Output>, lower: &[usize], upper: &[usize]) -> Result<NodeId> {
        let x = x.into();
        let tx = self.tensor(x)?;
        let shape = shape::slice(&tx.shape, lower, upper)?;
        let op = Op::Slice { lower: lower.into(), upper: upper.into() };
        Ok(self.push(op, [x], [TensorType { dtype: tx.dtype, shape }]))
    }

    pub fn get_output_element(&mut self, x: NodeId, index: usize) -> Result<NodeId> {
        let ty = self.tensor(x.output(index))?;
        Ok(self.push(Op::GetOutputElement { index }, [x.output(index)], [ty]))
    }

    // =========================================================================
    // Convolution
    // =========================================================================

    fn conv_type(&self, data: Output, filters: Output, attrs: &ConvAttrs) -> Result<TensorType> {
        let td = self.tensor(data)?;
        let tf = self.expect_dtype("convolution filters", filters, td.dtype)?;
        let shape = shape::convolution(&td.shape, &tf.shape, attrs)?;
        Ok(TensorType { dtype: td.dtype, shape })
    }

    fn conv_bias_check(&self, ty: &TensorType, bias: Output) -> Result<()> {
        self.expect_shape("convolution bias", bias, ty.dtype, &[ty.shape[1]])
    }

    pub fn convolution(&mut self, data: impl Into<Output>, filters: impl Into<Output>, attrs: ConvAttrs) -> Result<NodeId> {
        let (data, filters) = (data.into(), filters.into());
        let ty = self.conv_type(data, filters, &attrs)?;
        Ok(self.push(Op::Convolution(attrs), [data, filters], [ty]))
    }

    pub fn convolution_bias(
        &mut self,
        data: impl Into<Output>,
        filters: impl Into<Output>,
        bias: impl Into<Output>,
        attrs: ConvAttrs,
    ) -> Result<NodeId> {
        let (data, filters, bias) = (data.into(), filters.into(), bias.into());
        let ty = self.conv_type(data, filters, &attrs)?;
        self.conv_bias_check(&ty, bias)?;
        Ok(self.push(Op::ConvolutionBias(attrs), [data, filters, bias], [ty]))
    }

    pub fn convolution_relu(&mut self, data: impl Into<Output>, filters: impl Into<Output>, attrs: ConvAttrs) -> Result<NodeId> {
        let (data, filters) = (data.into(), filters.into());
        let ty = self.conv_type(data, filters, &attrs)?;
        Ok(self.push(Op::ConvolutionRelu(attrs), [data, filters], [ty]))
    }

    pub fn convolution_bias_relu(
        &mut self,
        data: impl Into<Output>,
        filters: impl Into<Output>,
        bias: impl Into<Output>,
        attrs: ConvAttrs,
    ) -> Result<NodeId> {
        let (data, filters, bias) = (data.into(), filters.into(), bias.into());
        let ty = self.conv_type(data, filters, &attrs)?;
        self.conv_bias_check(&ty, bias)?;
        Ok(self.push(Op::ConvolutionBiasRelu(attrs), [data, filters, bias], [ty]))
    }

    pub fn convolution_backprop_data(
        &mut self,
        data_shape: &[usize],
        filters: impl Into<Output>,
        delta: impl Into<Output>,
        attrs: ConvAttrs,
    ) -> Result<NodeId> {
        let (filters, delta) = (filters.into(), delta.into());
        let tf = self.tensor(filters)?;
        let expected = shape::convolution(data_shape, &tf.shape, &attrs)?;
        self.expect_shape("convolution data delta", delta, tf.dtype, &expected)?;
        let op = Op::ConvolutionBackpropData { data_shape: data_shape.into(), attrs };
        Ok(self.push(op, [filters, delta], [TensorType::new(tf.dtype, data_shape)]))
    }

    pub fn convolution_backprop_filters(
        &mut self,
        data: impl Into<Output>,
        filters_shape: &[usize],
        delta: impl Into<Output>,
        attrs: ConvAttrs,
    ) -> Result<NodeId> {
        let (data, delta) = (data.into(), delta.into());
        let td = self.tensor(data)?;
        let expected = shape::convolution(&td.shape, filters_shape, &attrs)?;
        self.expect_shape("convolution filters delta", delta, td.dtype, &expected)?;
        let op = Op::ConvolutionBackpropFilters { filters_shape: filters_shape.into(), attrs };
        Ok(self.push(op, [data, delta], [TensorType::new(td.dtype, filters_shape)]))
    }

    /// Outputs: `d_filters`, `d_bias`.
    pub fn convolution_bias_backprop_filters_bias(
        &mut self,
        data: impl Into<Output>,
        filters_shape: &[usize],
        delta: impl Into<Output>,
        attrs: ConvAttrs,
    ) -> Result<NodeId> {
        let (data, delta) = (data.into(), delta.into());
        let td = self.tensor(data)?;
        let expected = shape::convolution(&td.shape, filters_shape, &attrs)?;
        self.expect_shape("convolution bias delta", delta, td.dtype, &expected)?;
        let op = Op::ConvolutionBiasBackpropFiltersBias { filters_shape: filters_shape.into(), attrs };
        let outputs = [TensorType::new(td.dtype, filters_shape), TensorType::new(td.dtype, &[filters_shape[0]])];
        Ok(self.push(op, [data, delta], outputs))
    }

    // =========================================================================
    // Normalization and activations
    // =========================================================================

    fn batch_norm_types(&self, gamma: Output, beta: Output, input: Output) -> Result<[TensorType; 3]> {
        let ti = self.tensor(input)?;
        ensure!(
            ti.shape.len() >= 2,
            RankMismatchSnafu { context: "batch_norm input", expected: 2usize, actual: ti.shape.len() }
        );
        let channels = TensorType::new(ti.dtype, &[ti.shape[1]]);
        self.expect_type("batch_norm gamma", gamma, &channels)?;
        self.expect_type("batch_norm beta", beta, &channels)?;
        Ok([ti, channels.clone(), channels])
    }

    /// Outputs: `normalized`, `mean`, `variance`.
    pub fn batch_norm(
        &mut self,
        epsilon: f64,
        gamma: impl Into<Output>,
        beta: impl Into<Output>,
        input: impl Into<Output>,
    ) -> Result<NodeId> {
        let (gamma, beta, input) = (gamma.into(), beta.into(), input.into());
        let outputs = self.batch_norm_types(gamma, beta, input)?;
        Ok(self.push(Op::BatchNorm { epsilon }, [gamma, beta, input], outputs))
    }

    /// Outputs: `relu(normalized)`, `mean`, `variance`.
    pub fn batch_norm_relu(
        &mut self,
        epsilon: f64,
        gamma: impl Into<Output>,
        beta: impl Into<Output>,
        input: impl Into<Output>,
    ) -> Result<NodeId> {
        let (gamma, beta, input) = (gamma.into(), beta.into(), input.into());
        let outputs = self.batch_norm_types(gamma, beta, input)?;
        Ok(self.push(Op::BatchNormRelu { epsilon }, [gamma, beta, input], outputs))
    }

    /// Outputs: `d_input`, `d_gamma`, `d_beta`.
    #[allow(clippy::too_many_arguments)]
    pub fn batch_norm_backprop(
        &mut self,
        epsilon: f64,
        gamma: Output,
        beta: Output,
        input: Output,
        mean: Output,
        variance: Output,
        delta: Output,
    ) -> Result<NodeId> {
        let [ti, tg, tb] = self.batch_norm_types(gamma, beta, input)?;
        self.expect_type("batch_norm_backprop mean", mean, &tg)?;
        self.expect_type("batch_norm_backprop variance", variance, &tg)?;
        self.expect_type("batch_norm_backprop delta", delta, &ti)?;
        let op = Op::BatchNormBackprop { epsilon };
        Ok(self.push(op, [gamma, beta, input, mean, variance, delta], [ti, tg, tb]))
    }

    fn backprop_pair(&mut self, op: Op, x: Output, delta: Output) -> Result<NodeId> {
        let tx = self.tensor(x)?;
        self.expect_type("activation delta", delta, &tx)?;
        Ok(self.push(op, [x, delta], [tx]))
    }

    pub fn relu_backprop(&mut self, x: impl Into<Output>, delta: impl Into<Output>) -> Result<NodeId> {
        self.backprop_pair(Op::ReluBackprop, x.into(), delta.into())
    }

    pub fn sigmoid_backprop(&mut self, x: impl Into<Output>, delta: impl Into<Output>) -> Result<NodeId> {
        self.backprop_pair(Op::SigmoidBackprop, x.into(), delta.into())
    }

    pub fn sigmoid_multiply(
        &mut self,
        x: impl Into<Output>,
        y: impl Into<Output>,
        activations: [Activation; 2],
    ) -> Result<NodeId> {
        let (x, y) = (x.into(), y.into());
        let tx = self.tensor(x)?;
        self.expect_type("sigmoid_multiply", y, &tx)?;
        Ok(self.push(Op::SigmoidMultiply { activations }, [x, y], [tx]))
    }

    /// Outputs: `d_x`, `d_y`.
    pub fn sigmoid_multiply_backprop(
        &mut self,
        x: Output,
        y: Output,
        delta: Output,
        activations: [Activation; 2],
    ) -> Result<NodeId> {
        let tx = self.tensor(x)?;
        self.expect_type("sigmoid_multiply_backprop", y, &tx)?;
        self.expect_type("sigmoid_multiply_backprop delta", delta, &tx)?;
        Ok(self.push(Op::SigmoidMultiplyBackprop { activations }, [x, y, delta], [tx.clone(), tx]))
    }

    // =========================================================================
    // Recurrent
    // =========================================================================

    /// Checks one cell's operands and returns the `[batch, hidden]` state type.
    fn lstm_state_type(&self, x: Output, w_layer: Output, w_iter: Output, bias: Output) -> Result<TensorType> {
        let tx = self.tensor(x)?;
        ensure!(tx.shape.len() == 2, RankMismatchSnafu { context: "lstm input", expected: 2usize, actual: tx.shape.len() });
        let tw = self.expect_dtype("lstm iteration weights", w_iter, tx.dtype)?;
        ensure!(
            tw.shape.len() == 2 && tw.shape[1] == 4 * tw.shape[0],
            DotShapeSnafu { lhs: Shape::from_slice(&[tx.shape[0], tw.shape[0]]), rhs: tw.shape.clone() }
        );
        let hidden = tw.shape[0];
        self.expect_shape("lstm layer weights", w_layer, tx.dtype, &[tx.shape[1], 4 * hidden])?;
        self.expect_shape("lstm bias", bias, tx.dtype, &[4 * hidden])?;
        Ok(TensorType::new(tx.dtype, &[tx.shape[0], hidden]))
    }

    /// One LSTM cell. Outputs: `h`, `c`.
    pub fn lstm(&mut self, x: Output, h: Output, c: Output, w_layer: Output, w_iter: Output, bias: Output) -> Result<NodeId> {
        let state = self.lstm_state_type(x, w_layer, w_iter, bias)?;
        self.expect_type("lstm hidden state", h, &state)?;
        self.expect_type("lstm cell state", c, &state)?;
        Ok(self.push(Op::Lstm, [x, h, c, w_layer, w_iter, bias], [state.clone(), state]))
    }

    /// `xs.len()` chained LSTM cells. Outputs: every `h_t`, then every `c_t`.
    pub fn rnn(
        &mut self,
        w_layer: Output,
        w_iter: Output,
        bias: Output,
        h0: Output,
        c0: Output,
        xs: &[Output],
    ) -> Result<NodeId> {
        ensure!(!xs.is_empty(), ArityMismatchSnafu { context: "rnn inputs", expected: 6usize, actual: 5usize });
        let state = self.lstm_state_type(xs[0], w_layer, w_iter, bias)?;
        let input = self.tensor(xs[0])?;
        for &x in &xs[1..] {
            self.expect_type("rnn timestep input", x, &input)?;
        }
        self.expect_type("rnn initial hidden state", h0, &state)?;
        self.expect_type("rnn initial cell state", c0, &state)?;

        let id = NodeId(self.nodes.len() as u32);
        let inputs = [w_layer, w_iter, bias, h0, c0].into_iter().chain(xs.iter().copied()).collect();
        let outputs = smallvec![state; 2 * xs.len()];
        self.nodes.push(super::Node { id, op: Op::Rnn { timesteps: xs.len() }, inputs, outputs });
        Ok(id)
    }
}
