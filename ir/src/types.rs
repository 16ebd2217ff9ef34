//! Type definitions for graph operations.
//!
//! Constant payloads, elementwise operator tags, and the attribute structs
//! shared by convolution-like and recurrent operators.

use graft_dtype::{DType, HostType};
use smallvec::{SmallVec, smallvec};

/// Scalar value splatted over the shape of a constant node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl ConstValue {
    pub const fn zero(dtype: DType) -> Self {
        use DType::*;
        match dtype {
            Bool => Self::Bool(false),
            Int8 | Int16 | Int32 | Int64 => Self::Int(0),
            UInt8 | UInt16 | UInt32 | UInt64 => Self::UInt(0),
            Float16 | BFloat16 | Float32 | Float64 => Self::Float(0.0),
        }
    }

    pub const fn one(dtype: DType) -> Self {
        use DType::*;
        match dtype {
            Bool => Self::Bool(true),
            Int8 | Int16 | Int32 | Int64 => Self::Int(1),
            UInt8 | UInt16 | UInt32 | UInt64 => Self::UInt(1),
            Float16 | BFloat16 | Float32 | Float64 => Self::Float(1.0),
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            Self::Int(v) => v == 0,
            Self::UInt(v) => v == 0,
            Self::Float(v) => v == 0.0,
            Self::Bool(v) => !v,
        }
    }

    pub fn is_one(&self) -> bool {
        match *self {
            Self::Int(v) => v == 1,
            Self::UInt(v) => v == 1,
            Self::Float(v) => v == 1.0,
            Self::Bool(v) => v,
        }
    }

    /// Numeric value as `f64`, booleans map to 0/1.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::Float(v) => v,
            Self::Bool(v) => v as u8 as f64,
        }
    }

    /// Whether the value can be stored in a tensor of `dtype`.
    pub const fn fits(&self, dtype: DType) -> bool {
        match self {
            Self::Int(_) => dtype.is_signed(),
            Self::UInt(_) => dtype.is_unsigned(),
            Self::Float(_) => dtype.is_float(),
            Self::Bool(_) => dtype.is_bool(),
        }
    }
}

/// Conversion from Rust scalars, paired with their element type.
pub trait IntoConst: HostType {
    fn into_const(self) -> ConstValue;
}

macro_rules! impl_into_const {
    ($variant:ident: $($ty:ty),*) => {
        $(impl IntoConst for $ty {
            fn into_const(self) -> ConstValue { ConstValue::$variant(self.into()) }
        })*
    };
}

impl_into_const!(Int: i8, i16, i32, i64);
impl_into_const!(UInt: u8, u16, u32, u64);
impl_into_const!(Float: f32, f64);
impl_into_const!(Bool: bool);

/// Elementwise unary operators.
///
/// All unary operations preserve the input shape and dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumIter)]
pub enum UnaryOp {
    Neg,
    Abs,
    /// -1, 0 or 1 with the sign of x
    Sign,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Sigmoid,
    Relu,
}

/// Elementwise binary operators.
///
/// Both operands must share shape and dtype; the result keeps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumIter)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl BinaryOp {
    /// Returns true if this operation is commutative.
    pub fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Max | Self::Min)
    }
}

/// Activation applied to one operand of a fused sigmoid-multiply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Activation {
    Logistic,
    Tanh,
}

/// Window attributes of a convolution, one entry per spatial axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConvAttrs {
    pub strides: SmallVec<[usize; 2]>,
    pub dilations: SmallVec<[usize; 2]>,
    pub padding_below: SmallVec<[usize; 2]>,
    pub padding_above: SmallVec<[usize; 2]>,
}

impl ConvAttrs {
    /// Unit strides and dilations, no padding.
    pub fn unit(spatial_rank: usize) -> Self {
        Self {
            strides: smallvec![1; spatial_rank],
            dilations: smallvec![1; spatial_rank],
            padding_below: smallvec![0; spatial_rank],
            padding_above: smallvec![0; spatial_rank],
        }
    }

    pub fn with_padding(mut self, below: &[usize], above: &[usize]) -> Self {
        self.padding_below = below.into();
        self.padding_above = above.into();
        self
    }

    pub fn with_strides(mut self, strides: &[usize]) -> Self {
        self.strides = strides.into();
        self
    }

    pub fn spatial_rank(&self) -> usize {
        self.strides.len()
    }
}
