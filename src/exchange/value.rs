//! Value types carried by the exchange pipeline.
//!
//! Kernels are monomorphized per type; the exchanger erases the type at
//! the slot boundary and dispatches when a handle is created, not per
//! call. The trait is sealed over the supported wire scalars.

use serde::{Deserialize, Serialize};

/// Wire-level data type tags, one per supported scalar. Recorded in every
/// exchange slot and checked on execution. Boolean fields ride as `Byte`
/// (the `as_bool`/`from_bool` view below).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Byte,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

mod sealed {
    pub trait Sealed {}
}

/// A scalar the exchange pipeline can pack, reduce, and interpolate.
pub trait ExchangeValue:
    bytemuck::Pod + PartialOrd + PartialEq + Send + Sync + sealed::Sealed + 'static
{
    const DATA_TYPE: DataType;

    fn zero() -> Self;
    fn add(self, other: Self) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(x: f64) -> Self;

    #[inline]
    fn as_bool(self) -> bool {
        self != Self::zero()
    }

    #[inline]
    fn from_bool(b: bool) -> Self {
        if b {
            Self::from_f64(1.0)
        } else {
            Self::zero()
        }
    }

    #[inline]
    fn min_value(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    #[inline]
    fn max_value(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

macro_rules! exchange_value {
    ($($ty:ty => $tag:ident, $from:expr;)*) => {
        $(
            impl sealed::Sealed for $ty {}
            impl ExchangeValue for $ty {
                const DATA_TYPE: DataType = DataType::$tag;

                #[inline]
                fn zero() -> Self {
                    0 as $ty
                }

                #[inline]
                fn add(self, other: Self) -> Self {
                    self + other
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(x: f64) -> Self {
                    $from(x)
                }
            }
        )*
    };
}

exchange_value! {
    u8 => Byte, (|x: f64| x as u8);
    i32 => Int32, (|x: f64| x as i32);
    i64 => Int64, (|x: f64| x as i64);
    u32 => UInt32, (|x: f64| x as u32);
    u64 => UInt64, (|x: f64| x as u64);
    f32 => Float32, (|x: f64| x as f32);
    f64 => Float64, (|x: f64| x);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scalar_carries_its_wire_tag() {
        assert_eq!(<u8 as ExchangeValue>::DATA_TYPE, DataType::Byte);
        assert_eq!(<i32 as ExchangeValue>::DATA_TYPE, DataType::Int32);
        assert_eq!(<i64 as ExchangeValue>::DATA_TYPE, DataType::Int64);
        assert_eq!(<u32 as ExchangeValue>::DATA_TYPE, DataType::UInt32);
        assert_eq!(<u64 as ExchangeValue>::DATA_TYPE, DataType::UInt64);
        assert_eq!(<f32 as ExchangeValue>::DATA_TYPE, DataType::Float32);
        assert_eq!(<f64 as ExchangeValue>::DATA_TYPE, DataType::Float64);
    }

    #[test]
    fn boolean_view_of_scalars() {
        assert!(3.0f64.as_bool());
        assert!(!0u8.as_bool());
        assert_eq!(f32::from_bool(true), 1.0);
        assert_eq!(u64::from_bool(false), 0);
    }

    #[test]
    fn min_max_on_floats() {
        assert_eq!(1.5f64.min_value(-2.0), -2.0);
        assert_eq!(1.5f64.max_value(-2.0), 1.5);
    }
}
