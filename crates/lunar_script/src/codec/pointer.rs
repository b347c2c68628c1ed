//! Host pointers handed to the engine as light userdata
//!
//! The engine never owns these pointers and never frees them. Reading one
//! back performs no type check at all: whatever address sits in the slot is
//! reinterpreted as `*mut T`. Only dereferencing is `unsafe`, and that is the
//! single place where the caller vouches for the pointee.

use super::{sealed, Decode, Encode, Shape, Tagged, TypeTag};
use crate::error::DecodeError;
use crate::stack::{Slot, Stack};
use mlua::ffi;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Untyped pointer passed through the engine unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opaque(pub NonNull<c_void>);

/// Non-null pointer to a host `T`, borrowed by the engine.
pub struct HostPtr<T> {
    ptr: NonNull<T>,
    _marker: PhantomData<*mut T>,
}

impl<T> HostPtr<T> {
    pub fn new(value: &mut T) -> Self {
        Self::from_non_null(NonNull::from(value))
    }

    pub fn from_non_null(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    pub fn as_ptr(self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// # Safety
    /// The slot this pointer came from must have been produced by encoding a
    /// `HostPtr<T>` of the same `T`, and the pointee must still be alive and
    /// not mutably borrowed elsewhere.
    pub unsafe fn as_ref<'a>(self) -> &'a T {
        self.ptr.as_ref()
    }

    /// # Safety
    /// Same contract as [`HostPtr::as_ref`], and no other reference to the
    /// pointee may exist for `'a`.
    pub unsafe fn as_mut<'a>(mut self) -> &'a mut T {
        self.ptr.as_mut()
    }
}

impl<T> Clone for HostPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HostPtr<T> {}

impl<T> PartialEq for HostPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for HostPtr<T> {}

impl<T> fmt::Debug for HostPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostPtr").field(&self.ptr).finish()
    }
}

/// Raw userdata address in `slot`, or `NullRequired` if there is none.
fn read_address(slot: &Slot<'_>, tag: TypeTag) -> Result<NonNull<c_void>, DecodeError> {
    if slot.is_absent() {
        return Err(DecodeError::NullRequired { tag });
    }
    match slot.lua_type() {
        ffi::LUA_TLIGHTUSERDATA | ffi::LUA_TUSERDATA => {}
        _ => {
            return Err(DecodeError::WrongShape {
                expected: tag,
                found: slot.type_name(),
            })
        }
    }
    let raw = unsafe { ffi::lua_touserdata(slot.state(), slot.index()) };
    NonNull::new(raw).ok_or(DecodeError::NullRequired { tag })
}

fn push_address(stack: &mut Stack, ptr: *mut c_void) {
    stack.reserve(1);
    unsafe { ffi::lua_pushlightuserdata(stack.state(), ptr) };
}

impl sealed::Sealed for Opaque {}

impl Tagged for Opaque {
    const TAG: TypeTag = TypeTag::new(Shape::Opaque);
}

impl<'s> Decode<'s> for Opaque {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        read_address(&slot, Self::TAG).map(Opaque)
    }
}

impl Encode for Opaque {
    fn encode(self, stack: &mut Stack) {
        push_address(stack, self.0.as_ptr());
    }
}

impl<T> sealed::Sealed for HostPtr<T> {}

impl<T> Tagged for HostPtr<T> {
    const TAG: TypeTag = TypeTag::new(Shape::Pointer);
}

impl<'s, T> Decode<'s> for HostPtr<T> {
    fn decode(slot: Slot<'s>) -> Result<Self, DecodeError> {
        read_address(&slot, Self::TAG).map(|raw| HostPtr::from_non_null(raw.cast::<T>()))
    }
}

impl<T> Encode for HostPtr<T> {
    fn encode(self, stack: &mut Stack) {
        push_address(stack, self.ptr.as_ptr().cast::<c_void>());
    }
}
