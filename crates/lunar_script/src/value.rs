//! Dynamically tagged values
//!
//! The trait-based codec picks its rule from a host type. This module picks
//! the same rules from a [`TypeTag`] known only at runtime, which is what
//! descriptor-driven record reads need.

use crate::codec::numeric::{push_number, read_number};
use crate::codec::{Decode, Encode, NativeFn, Opaque, Shape, TypeTag};
use crate::error::DecodeError;
use crate::stack::{Slot, Stack};

/// A decoded engine value, widened to the largest host type of its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The engine's "no value" sentinel
    Absent,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
    Opaque(Opaque),
    Callable(NativeFn),
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int(n) => Some(n as f64),
            Value::UInt(n) => Some(n as f64),
            Value::Float(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

pub(crate) fn decode_value(slot: Slot<'_>, tag: TypeTag) -> Result<Value, DecodeError> {
    if tag.optional && slot.is_absent() {
        return Ok(Value::Absent);
    }
    let required = TypeTag::new(tag.shape);
    match tag.shape {
        Shape::Bool => bool::decode(slot).map(Value::Bool),
        Shape::Number(kind) => read_number(&slot, required).map(|n| kind.narrow(n)),
        Shape::Bytes => Vec::<u8>::decode(slot).map(Value::Bytes),
        Shape::Opaque => Opaque::decode(slot).map(Value::Opaque),
        Shape::Callable => NativeFn::decode(slot).map(Value::Callable),
        // Typed pointers and records need a host type to land in.
        Shape::Pointer | Shape::Table(_) => Err(DecodeError::UnsupportedType(tag.name())),
    }
}

pub(crate) fn encode_value(stack: &mut Stack, value: &Value) {
    match value {
        Value::Absent => None::<bool>.encode(stack),
        Value::Bool(b) => (*b).encode(stack),
        Value::Int(n) => push_number(stack, *n as f64),
        Value::UInt(n) => push_number(stack, *n as f64),
        Value::Float(n) => push_number(stack, *n),
        Value::Bytes(bytes) => bytes.as_slice().encode(stack),
        Value::Opaque(ptr) => (*ptr).encode(stack),
        Value::Callable(func) => (*func).encode(stack),
    }
}
