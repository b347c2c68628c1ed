//! Numeric conversions
//!
//! The engine stores every number as a double. All integer widths and both
//! float widths share one rule: read the double, then narrow it with Rust's
//! `as` conversion. There is no range check, so out-of-range values saturate
//! at the target's bounds and NaN becomes zero.

use super::{require_present, sealed, Decode, Encode, Shape, Tagged, TypeTag};
use crate::error::DecodeError;
use crate::stack::{Slot, Stack};
use crate::value::Value;
use mlua::ffi;

/// Width and signedness of a numeric tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl NumberKind {
    pub fn name(self) -> &'static str {
        match self {
            NumberKind::I8 => "i8",
            NumberKind::I16 => "i16",
            NumberKind::I32 => "i32",
            NumberKind::I64 => "i64",
            NumberKind::U8 => "u8",
            NumberKind::U16 => "u16",
            NumberKind::U32 => "u32",
            NumberKind::U64 => "u64",
            NumberKind::F32 => "f32",
            NumberKind::F64 => "f64",
        }
    }

    /// Size of the host type in bytes.
    pub fn width(self) -> usize {
        match self {
            NumberKind::I8 | NumberKind::U8 => 1,
            NumberKind::I16 | NumberKind::U16 => 2,
            NumberKind::I32 | NumberKind::U32 | NumberKind::F32 => 4,
            NumberKind::I64 | NumberKind::U64 | NumberKind::F64 => 8,
        }
    }

    /// Narrow an engine number to this kind, widened back into a [`Value`].
    ///
    /// Used by the dynamic path, where the host type is only known at runtime.
    pub fn narrow(self, n: f64) -> Value {
        match self {
            NumberKind::I8 => Value::Int(i64::from(n as i8)),
            NumberKind::I16 => Value::Int(i64::from(n as i16)),
            NumberKind::I32 => Value::Int(i64::from(n as i32)),
            NumberKind::I64 => Value::Int(n as i64),
            NumberKind::U8 => Value::UInt(u64::from(n as u8)),
            NumberKind::U16 => Value::UInt(u64::from(n as u16)),
            NumberKind::U32 => Value::UInt(u64::from(n as u32)),
            NumberKind::U64 => Value::UInt(n as u64),
            NumberKind::F32 => Value::Float(f64::from(n as f32)),
            NumberKind::F64 => Value::Float(n),
        }
    }
}

/// Host numeric types, each one row of the [`NumberKind`] table.
pub(crate) trait Numeric: Copy {
    const KIND: NumberKind;

    fn from_number(n: f64) -> Self;
    fn into_number(self) -> f64;
}

/// Read the double at `slot`; nil is rejected for every numeric tag.
///
/// Only engine numbers decode. Numeric strings are rejected like any other
/// non-number, matching the string rule's refusal to convert numbers.
pub(crate) fn read_number(slot: &Slot<'_>, tag: TypeTag) -> Result<f64, DecodeError> {
    require_present(slot, tag)?;
    if slot.lua_type() != ffi::LUA_TNUMBER {
        return Err(DecodeError::WrongShape {
            expected: tag,
            found: slot.type_name(),
        });
    }
    Ok(unsafe { ffi::lua_tonumber(slot.state(), slot.index()) })
}

pub(crate) fn push_number(stack: &mut Stack, n: f64) {
    stack.reserve(1);
    unsafe { ffi::lua_pushnumber(stack.state(), n) };
}

fn decode<N: Numeric>(slot: &Slot<'_>) -> Result<N, DecodeError> {
    read_number(slot, TypeTag::new(Shape::Number(N::KIND))).map(N::from_number)
}

macro_rules! impl_numeric {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Numeric for $ty {
                const KIND: NumberKind = NumberKind::$kind;

                #[inline]
                fn from_number(n: f64) -> Self {
                    n as $ty
                }

                #[inline]
                fn into_number(self) -> f64 {
                    self as f64
                }
            }

            impl sealed::Sealed for $ty {}

            impl Tagged for $ty {
                const TAG: TypeTag = TypeTag::new(Shape::Number(NumberKind::$kind));
            }

            impl<'s> Decode<'s> for $ty {
                fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
                    decode::<$ty>(&slot)
                }
            }

            impl Encode for $ty {
                fn encode(self, stack: &mut Stack) {
                    push_number(stack, self.into_number());
                }
            }
        )*
    };
}

impl_numeric!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_match_host_types() {
        assert_eq!(NumberKind::I8.width(), std::mem::size_of::<i8>());
        assert_eq!(NumberKind::U16.width(), std::mem::size_of::<u16>());
        assert_eq!(NumberKind::F32.width(), std::mem::size_of::<f32>());
        assert_eq!(NumberKind::U64.width(), std::mem::size_of::<u64>());
    }

    #[test]
    fn narrowing_saturates_without_validation() {
        assert_eq!(<u8 as Numeric>::from_number(300.0), u8::MAX);
        assert_eq!(<i8 as Numeric>::from_number(-1000.0), i8::MIN);
        assert_eq!(<u32 as Numeric>::from_number(-5.0), 0);
        assert_eq!(<i32 as Numeric>::from_number(7.9), 7);
        assert_eq!(<i64 as Numeric>::from_number(f64::NAN), 0);
    }

    #[test]
    fn dynamic_narrowing_agrees_with_static() {
        assert_eq!(NumberKind::I16.narrow(40000.0), Value::Int(i64::from(i16::MAX)));
        assert_eq!(NumberKind::U8.narrow(77.0), Value::UInt(77));
        assert_eq!(NumberKind::F32.narrow(0.1), Value::Float(f64::from(0.1f32)));
    }
}
