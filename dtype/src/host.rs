//! Rust scalar types and the element type they are stored as.

use crate::DType;

/// Rust scalar whose values are elements of [`DTYPE`](Self::DTYPE).
pub trait HostType: Copy {
    const DTYPE: DType;
}

macro_rules! host_types {
    ($($variant:ident: $($ty:ty),+;)*) => {
        $($(impl HostType for $ty { const DTYPE: DType = DType::$variant; })+)*
    };
}

host_types! {
    Bool: bool;
    Int8: i8;
    Int16: i16;
    Int32: i32;
    Int64: i64;
    UInt8: u8;
    UInt16: u16;
    UInt32: u32;
    UInt64: u64;
    Float32: f32;
    Float64: f64;
}
