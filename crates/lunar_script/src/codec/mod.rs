//! Value codec between host values and engine stack slots
//!
//! Every supported host shape carries exactly one [`TypeTag`] and exactly one
//! encode and decode rule. The traits are sealed: a type outside the closed
//! set cannot be pushed or read, so unsupported types are rejected when the
//! program is compiled rather than when it runs.
//!
//! ## Aliasing
//!
//! Decoding `&[u8]` or `&str` returns a slice that points straight into
//! engine memory. It borrows the [`Stack`] it came from, and every stack
//! mutation takes `&mut Stack`, so the slice must be dropped (or copied)
//! before the next push, pop or call. Owned forms (`Vec<u8>`, `String`) copy
//! on decode.

pub(crate) mod numeric;
mod pointer;

pub use numeric::NumberKind;
pub use pointer::{HostPtr, Opaque};

use crate::error::{DecodeError, STACK_TOP};
use crate::stack::{Slot, Stack};
use mlua::ffi;
use std::fmt;
use std::os::raw::c_int;

/// Value shapes the codec knows how to move across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Bool,
    Number(NumberKind),
    Bytes,
    /// Single-level pointer to a host value
    Pointer,
    Opaque,
    Callable,
    /// Record declared with `host_struct!`
    Table(&'static str),
}

/// Closed type tag: a shape plus whether the absent sentinel is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
    pub shape: Shape,
    pub optional: bool,
}

impl TypeTag {
    pub const fn new(shape: Shape) -> Self {
        Self {
            shape,
            optional: false,
        }
    }

    /// Same shape, but nil decodes to "absent" instead of failing.
    pub const fn optional(self) -> Self {
        Self {
            shape: self.shape,
            optional: true,
        }
    }

    /// Diagnostic name of the shape, without the optional marker.
    pub fn name(&self) -> &'static str {
        match self.shape {
            Shape::Bool => "bool",
            Shape::Number(kind) => kind.name(),
            Shape::Bytes => "string",
            Shape::Pointer => "pointer",
            Shape::Opaque => "opaque",
            Shape::Callable => "callable",
            Shape::Table(name) => name,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "optional {}", self.name())
        } else {
            f.write_str(self.name())
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Associates a host type with its [`TypeTag`].
pub trait Tagged: sealed::Sealed {
    const TAG: TypeTag;
}

/// Read a host value out of a stack slot without mutating the stack.
pub trait Decode<'s>: Tagged + Sized {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError>;
}

/// Decode results that do not borrow engine memory.
///
/// Required wherever the slot is popped right after decoding.
pub trait DecodeOwned: for<'s> Decode<'s> {}

impl<T> DecodeOwned for T where T: for<'s> Decode<'s> {}

/// Push a host value onto the stack top.
pub trait Encode: Tagged {
    fn encode(self, stack: &mut Stack);
}

/// Reject the absent sentinel for non-optional tags.
pub(crate) fn require_present(slot: &Slot<'_>, tag: TypeTag) -> Result<(), DecodeError> {
    if slot.is_absent() {
        return Err(DecodeError::MissingField {
            field: STACK_TOP.to_string(),
            tag,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// bool
// ---------------------------------------------------------------------------

impl sealed::Sealed for bool {}

impl Tagged for bool {
    const TAG: TypeTag = TypeTag::new(Shape::Bool);
}

impl<'s> Decode<'s> for bool {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        require_present(&slot, Self::TAG)?;
        Ok(unsafe { ffi::lua_toboolean(slot.state(), slot.index()) } != 0)
    }
}

impl Encode for bool {
    fn encode(self, stack: &mut Stack) {
        stack.reserve(1);
        unsafe { ffi::lua_pushboolean(stack.state(), c_int::from(self)) };
    }
}

// ---------------------------------------------------------------------------
// strings
// ---------------------------------------------------------------------------

const BYTES: TypeTag = TypeTag::new(Shape::Bytes);

/// Borrow the engine-owned bytes of a string slot.
fn borrow_bytes<'s>(slot: &Slot<'s>) -> Result<&'s [u8], DecodeError> {
    require_present(slot, BYTES)?;
    if slot.lua_type() != ffi::LUA_TSTRING {
        return Err(DecodeError::WrongShape {
            expected: BYTES,
            found: slot.type_name(),
        });
    }
    let mut len = 0usize;
    let ptr = unsafe { ffi::lua_tolstring(slot.state(), slot.index(), &mut len) };
    if ptr.is_null() {
        return Err(DecodeError::WrongShape {
            expected: BYTES,
            found: slot.type_name(),
        });
    }
    // The slot is a string, so the engine keeps the buffer alive for as long
    // as the slot stays on the stack, which `'s` guarantees.
    Ok(unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) })
}

fn push_bytes(stack: &mut Stack, bytes: &[u8]) {
    stack.reserve(1);
    unsafe {
        ffi::lua_pushlstring(stack.state(), bytes.as_ptr().cast(), bytes.len());
    }
}

macro_rules! impl_string {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Tagged for $ty {
                const TAG: TypeTag = BYTES;
            }
        )*
    };
}

impl_string!(&[u8], &str, Vec<u8>, String);

impl<'s> Decode<'s> for &'s [u8] {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        borrow_bytes(&slot)
    }
}

impl<'s> Decode<'s> for &'s str {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        std::str::from_utf8(borrow_bytes(&slot)?).map_err(|_| DecodeError::InvalidUtf8)
    }
}

impl<'s> Decode<'s> for Vec<u8> {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        borrow_bytes(&slot).map(<[u8]>::to_vec)
    }
}

impl<'s> Decode<'s> for String {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        <&str>::decode(slot).map(str::to_owned)
    }
}

impl Encode for &[u8] {
    fn encode(self, stack: &mut Stack) {
        push_bytes(stack, self);
    }
}

impl Encode for &str {
    fn encode(self, stack: &mut Stack) {
        push_bytes(stack, self.as_bytes());
    }
}

impl Encode for Vec<u8> {
    fn encode(self, stack: &mut Stack) {
        push_bytes(stack, &self);
    }
}

impl Encode for String {
    fn encode(self, stack: &mut Stack) {
        push_bytes(stack, self.as_bytes());
    }
}

// ---------------------------------------------------------------------------
// optional
// ---------------------------------------------------------------------------

impl<T: Tagged> sealed::Sealed for Option<T> {}

impl<T: Tagged> Tagged for Option<T> {
    const TAG: TypeTag = T::TAG.optional();
}

impl<'s, T: Decode<'s>> Decode<'s> for Option<T> {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        if slot.is_absent() {
            return Ok(None);
        }
        T::decode(slot).map(Some)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(self, stack: &mut Stack) {
        match self {
            Some(value) => value.encode(stack),
            None => {
                stack.reserve(1);
                unsafe { ffi::lua_pushnil(stack.state()) };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// callable
// ---------------------------------------------------------------------------

/// Native function the engine can call directly.
///
/// The function receives the raw engine state and follows the engine's own
/// calling convention. Closures go through
/// [`Session::register_callable`](crate::Session::register_callable) instead.
#[derive(Clone, Copy)]
pub struct NativeFn(pub ffi::lua_CFunction);

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeFn")
            .field(&(self.0 as *const ()))
            .finish()
    }
}

impl PartialEq for NativeFn {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0 as *const (), other.0 as *const ())
    }
}

impl Eq for NativeFn {}

impl sealed::Sealed for NativeFn {}

impl Tagged for NativeFn {
    const TAG: TypeTag = TypeTag::new(Shape::Callable);
}

impl<'s> Decode<'s> for NativeFn {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        require_present(&slot, Self::TAG)?;
        let wrong_shape = || DecodeError::WrongShape {
            expected: Self::TAG,
            found: slot.type_name(),
        };
        if unsafe { ffi::lua_iscfunction(slot.state(), slot.index()) } == 0 {
            return Err(wrong_shape());
        }
        let func: Option<ffi::lua_CFunction> =
            Option::from(unsafe { ffi::lua_tocfunction(slot.state(), slot.index()) });
        func.map(NativeFn).ok_or_else(wrong_shape)
    }
}

impl Encode for NativeFn {
    fn encode(self, stack: &mut Stack) {
        stack.reserve(1);
        unsafe { ffi::lua_pushcfunction(stack.state(), self.0) };
    }
}
