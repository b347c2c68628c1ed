//! Non-owning view of an engine's value stack
//!
//! [`Stack`] is the only way host code touches the engine. The session owns
//! the engine state and hands out `&mut Stack`; host callables get a `Stack`
//! over the state they were called with. Every operation here leaves the
//! stack depth exactly as documented, including on error.

use crate::codec::{Decode, DecodeOwned, Encode, Shape, TypeTag};
use crate::error::DecodeError;
use crate::record::{FieldDescriptor, LuaStruct, Record};
use crate::value::{self, Value};
use mlua::ffi;
use std::ffi::CString;
use std::ops::{Deref, DerefMut};
use std::os::raw::c_int;
use std::ptr::NonNull;

const ANY_TABLE: TypeTag = TypeTag::new(Shape::Table("table"));

/// Handle to the value stack of one engine state.
///
/// Not `Send`/`Sync`: one engine is driven by one thread.
#[derive(Debug)]
pub struct Stack {
    state: NonNull<ffi::lua_State>,
}

/// One occupied (or missing) position on the stack, passed to decoders.
///
/// Indices are absolute and 1-based. A slot above the stack top reads as
/// "none", which every decoder treats as the absent sentinel.
#[derive(Debug, Clone, Copy)]
pub struct Slot<'s> {
    stack: &'s Stack,
    index: c_int,
}

impl<'s> Slot<'s> {
    pub(crate) fn state(&self) -> *mut ffi::lua_State {
        self.stack.state()
    }

    pub fn index(&self) -> c_int {
        self.index
    }

    /// Raw engine type code of the slot (`LUA_TNONE` when out of range).
    pub fn lua_type(&self) -> c_int {
        if self.index < 1 || self.index > self.stack.top() {
            return ffi::LUA_TNONE;
        }
        unsafe { ffi::lua_type(self.state(), self.index) }
    }

    /// True for nil and for positions past the top.
    pub fn is_absent(&self) -> bool {
        matches!(self.lua_type(), ffi::LUA_TNIL | ffi::LUA_TNONE)
    }

    pub fn type_name(&self) -> &'static str {
        match self.lua_type() {
            ffi::LUA_TNIL => "nil",
            ffi::LUA_TBOOLEAN => "boolean",
            ffi::LUA_TLIGHTUSERDATA => "light userdata",
            ffi::LUA_TNUMBER => "number",
            ffi::LUA_TSTRING => "string",
            ffi::LUA_TTABLE => "table",
            ffi::LUA_TFUNCTION => "function",
            ffi::LUA_TUSERDATA => "userdata",
            ffi::LUA_TTHREAD => "thread",
            ffi::LUA_TNONE => "no value",
            _ => "unknown",
        }
    }
}

/// Convert a host name into a C string for the engine's name-based calls.
pub(crate) fn c_name(name: &str) -> Result<CString, DecodeError> {
    CString::new(name).map_err(|_| DecodeError::InvalidName {
        name: name.to_string(),
    })
}

impl Stack {
    pub(crate) fn from_raw(state: *mut ffi::lua_State) -> Option<Self> {
        NonNull::new(state).map(|state| Self { state })
    }

    #[inline]
    pub(crate) fn state(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    #[inline]
    fn top(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.state()) }
    }

    /// Make room for `extra` more slots.
    ///
    /// Failing to grow means the engine is out of memory; there is no stack
    /// state left to recover, so this panics.
    pub(crate) fn reserve(&mut self, extra: c_int) {
        let grown = unsafe { ffi::lua_checkstack(self.state(), extra) };
        assert!(grown != 0, "engine stack cannot grow by {extra} slots");
    }

    /// Restores the current depth when dropped.
    pub(crate) fn scoped(&mut self) -> StackGuard<'_> {
        let depth = self.top();
        StackGuard { stack: self, depth }
    }

    /// Number of occupied slots.
    pub fn depth(&self) -> usize {
        self.top() as usize
    }

    fn top_slot(&self) -> Result<Slot<'_>, DecodeError> {
        match self.top() {
            0 => Err(DecodeError::EmptyStack),
            index => Ok(Slot { stack: self, index }),
        }
    }

    /// Decode the top slot without popping it.
    ///
    /// Borrowed results (`&[u8]`, `&str`) keep `self` borrowed, so no push or
    /// pop can happen while they are alive.
    pub fn peek<'s, T: Decode<'s>>(&'s self) -> Result<T, DecodeError> {
        T::decode(self.top_slot()?)
    }

    /// Decode the top slot and pop it, whether or not decoding succeeded.
    pub fn pop<T: DecodeOwned>(&mut self) -> Result<T, DecodeError> {
        let value = T::decode(self.top_slot()?);
        self.discard(1);
        value
    }

    pub fn push<T: Encode>(&mut self, value: T) {
        value.encode(self);
    }

    /// Pop up to `count` slots.
    pub fn discard(&mut self, count: usize) {
        let count = count.min(self.depth());
        if count > 0 {
            unsafe { ffi::lua_pop(self.state(), count as c_int) };
        }
    }

    /// Number of arguments a host callable was invoked with.
    pub fn arg_count(&self) -> usize {
        self.depth()
    }

    /// Decode the `n`th argument (1-based) of a host callable.
    ///
    /// Missing arguments read as absent: `Option<T>` yields `None`, anything
    /// else fails with `MissingField`.
    pub fn arg<'s, T: Decode<'s>>(&'s self, n: usize) -> Result<T, DecodeError> {
        let index = c_int::try_from(n).unwrap_or(c_int::MAX);
        T::decode(Slot { stack: self, index })
    }

    /// Decode the top slot by runtime tag.
    pub fn peek_value(&self, tag: TypeTag) -> Result<Value, DecodeError> {
        value::decode_value(self.top_slot()?, tag)
    }

    pub fn push_value(&mut self, value: &Value) {
        value::encode_value(self, value);
    }

    /// Push a fresh empty table.
    pub fn new_table(&mut self) {
        self.reserve(1);
        unsafe { ffi::lua_createtable(self.state(), 0, 0) };
    }

    fn require_table(&self, expected: TypeTag) -> Result<(), DecodeError> {
        let slot = self.top_slot()?;
        if slot.lua_type() != ffi::LUA_TTABLE {
            return Err(DecodeError::WrongShape {
                expected,
                found: slot.type_name(),
            });
        }
        Ok(())
    }

    /// Push `table[name]` for the table on top, run `read` on it, then pop it.
    ///
    /// Lookups are raw, so metamethods never run from inside the codec.
    fn with_field<R>(
        &mut self,
        name: &str,
        read: impl for<'s> FnOnce(Slot<'s>) -> Result<R, DecodeError>,
    ) -> Result<R, DecodeError> {
        let mut guard = self.scoped();
        guard.reserve(1);
        unsafe {
            let state = guard.state();
            ffi::lua_pushlstring(state, name.as_ptr().cast(), name.len());
            ffi::lua_rawget(state, -2);
        }
        let slot = guard.top_slot()?;
        read(slot).map_err(|err| err.in_field(name))
    }

    /// Read the named field of the table on top of the stack.
    pub fn read_field<T: DecodeOwned>(&mut self, name: &str) -> Result<T, DecodeError> {
        self.require_table(ANY_TABLE)?;
        self.with_field(name, |slot| T::decode(slot))
    }

    /// Store `value` as the named field of the table on top of the stack.
    pub fn write_field<T: Encode>(&mut self, name: &str, value: T) -> Result<(), DecodeError> {
        self.require_table(ANY_TABLE)?;
        self.reserve(1);
        unsafe {
            ffi::lua_pushlstring(self.state(), name.as_ptr().cast(), name.len());
        }
        self.push(value);
        unsafe { ffi::lua_rawset(self.state(), -3) };
        Ok(())
    }

    /// Decode the table on top into a record declared with `host_struct!`.
    ///
    /// Fields are read in declaration order and the first failure is
    /// returned; the record is only built once every field decoded.
    pub fn read_struct<S: LuaStruct>(&mut self) -> Result<S, DecodeError> {
        self.require_table(TypeTag::new(Shape::Table(S::NAME)))?;
        S::read_fields(self)
    }

    /// Push a new table holding every field of `value`.
    pub fn push_struct<S: LuaStruct>(&mut self, value: S) -> Result<(), DecodeError> {
        self.reserve(1);
        unsafe {
            ffi::lua_createtable(self.state(), 0, S::FIELDS.len() as c_int);
        }
        let depth = self.top();
        let written = value.write_fields(self);
        if written.is_err() {
            unsafe { ffi::lua_settop(self.state(), depth - 1) };
        }
        written
    }

    /// Read the table on top using a runtime field-descriptor table.
    pub fn read_record(&mut self, fields: &[FieldDescriptor]) -> Result<Record, DecodeError> {
        self.require_table(ANY_TABLE)?;
        let mut record = Record::with_capacity(fields.len());
        for field in fields {
            let tag = field.tag;
            let value = self.with_field(field.name, |slot| value::decode_value(slot, tag))?;
            record.insert(field.name, value);
        }
        Ok(record)
    }

    /// Push the globals table.
    fn push_globals(&mut self) {
        self.reserve(1);
        #[cfg(feature = "luajit")]
        unsafe {
            ffi::lua_pushvalue(self.state(), ffi::LUA_GLOBALSINDEX);
        }
        #[cfg(not(feature = "luajit"))]
        unsafe {
            ffi::lua_rawgeti(self.state(), ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_GLOBALS);
        }
    }

    /// Push the value of a global (nil if unset).
    ///
    /// Access is raw, so a metatable on the globals table is never consulted.
    pub fn get_global(&mut self, name: &str) -> Result<(), DecodeError> {
        c_name(name)?;
        self.push_globals();
        self.reserve(1);
        unsafe {
            let state = self.state();
            ffi::lua_pushlstring(state, name.as_ptr().cast(), name.len());
            ffi::lua_rawget(state, -2);
            ffi::lua_remove(state, -2);
        }
        Ok(())
    }

    /// Pop the top slot into a global, bypassing any globals metatable.
    pub fn set_global(&mut self, name: &str) -> Result<(), DecodeError> {
        c_name(name)?;
        self.top_slot()?;
        self.push_globals();
        self.reserve(2);
        unsafe {
            let state = self.state();
            ffi::lua_pushlstring(state, name.as_ptr().cast(), name.len());
            ffi::lua_pushvalue(state, -3);
            ffi::lua_rawset(state, -3);
            ffi::lua_pop(state, 2);
        }
        Ok(())
    }
}

/// Restores the stack to a recorded depth on drop.
pub(crate) struct StackGuard<'a> {
    stack: &'a mut Stack,
    depth: c_int,
}

impl Deref for StackGuard<'_> {
    type Target = Stack;

    fn deref(&self) -> &Stack {
        self.stack
    }
}

impl DerefMut for StackGuard<'_> {
    fn deref_mut(&mut self) -> &mut Stack {
        self.stack
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        unsafe { ffi::lua_settop(self.stack.state(), self.depth) };
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{HostPtr, NativeFn, NumberKind, Opaque};
    use crate::error::DecodeError;
    use crate::record::FieldDescriptor;
    use crate::session::Session;
    use crate::value::Value;
    use crate::{Shape, TypeTag};
    use mlua::ffi;
    use std::ffi::c_void;
    use std::os::raw::c_int;
    use std::ptr::NonNull;

    fn session() -> Session {
        Session::new().unwrap()
    }

    macro_rules! assert_round_trip {
        ($stack:expr, $($ty:ty = $value:expr),* $(,)?) => {
            $(
                $stack.push::<$ty>($value);
                assert_eq!($stack.pop::<$ty>().unwrap(), $value, stringify!($ty));
            )*
        };
    }

    #[test]
    fn scalars_round_trip() {
        let mut s = session();
        assert_round_trip!(s,
            bool = true,
            bool = false,
            i8 = -100,
            i16 = -30_000,
            i32 = 77,
            i64 = -(1 << 40),
            u8 = 255,
            u16 = 65_000,
            u32 = 4_000_000_000,
            u64 = 1 << 52,
        );

        s.push(7.7f32);
        assert!((s.pop::<f32>().unwrap() - 7.7).abs() < f32::EPSILON);
        s.push(7.7f64);
        assert!((s.pop::<f64>().unwrap() - 7.7).abs() < f64::EPSILON);

        s.push("Hello From Lua");
        assert_eq!(s.pop::<String>().unwrap(), "Hello From Lua");
        s.push(vec![0u8, 159, 146, 150]);
        assert_eq!(s.pop::<Vec<u8>>().unwrap(), vec![0u8, 159, 146, 150]);
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn absent_optionals_round_trip() {
        let mut s = session();
        assert_round_trip!(s,
            Option<bool> = None,
            Option<i8> = None,
            Option<i16> = None,
            Option<i32> = None,
            Option<i64> = None,
            Option<u8> = None,
            Option<u16> = None,
            Option<u32> = None,
            Option<u64> = None,
            Option<f32> = None,
            Option<f64> = None,
            Option<String> = None,
            Option<Vec<u8>> = None,
            Option<Opaque> = None,
            Option<HostPtr<u8>> = None,
            Option<NativeFn> = None,
        );
        s.push(Some(3u16));
        assert_eq!(s.pop::<Option<u16>>().unwrap(), Some(3));
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn numbers_reject_other_shapes() {
        let mut s = session();
        s.push("abc");
        assert_eq!(
            s.pop::<i32>().unwrap_err(),
            DecodeError::WrongShape {
                expected: TypeTag::new(Shape::Number(NumberKind::I32)),
                found: "string",
            }
        );
        s.push("12");
        assert!(matches!(
            s.pop::<Option<f64>>().unwrap_err(),
            DecodeError::WrongShape { found: "string", .. }
        ));
        s.push(true);
        assert!(matches!(
            s.peek_value(TypeTag::new(Shape::Number(NumberKind::U8))),
            Err(DecodeError::WrongShape { found: "boolean", .. })
        ));
        s.discard(1);
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn narrowing_has_no_range_check() {
        let mut s = session();
        s.push(300.0f64);
        assert_eq!(s.pop::<u8>().unwrap(), u8::MAX);
        s.push(-1.5f64);
        assert_eq!(s.pop::<i32>().unwrap(), -1);
    }

    #[test]
    fn borrowed_strings_alias_engine_memory() {
        let mut s = session();
        s.push("borrowed");
        {
            let bytes: &[u8] = s.peek().unwrap();
            assert_eq!(bytes, b"borrowed");
            let text: &str = s.peek().unwrap();
            assert_eq!(text, "borrowed");
        }
        assert_eq!(s.depth(), 1);
        s.discard(1);
    }

    #[test]
    fn pop_removes_slot_even_when_decode_fails() {
        let mut s = session();
        s.push(12i32);
        let err = s.pop::<String>().unwrap_err();
        assert!(matches!(err, DecodeError::WrongShape { found: "number", .. }));
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn empty_stack_is_reported() {
        let mut s = session();
        assert_eq!(s.peek::<i32>().unwrap_err(), DecodeError::EmptyStack);
        assert_eq!(s.set_global("x").unwrap_err(), DecodeError::EmptyStack);
        s.discard(3);
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn nil_for_required_values() {
        let mut s = session();
        s.push(None::<i32>);
        assert!(matches!(
            s.peek::<i32>().unwrap_err(),
            DecodeError::MissingField { .. }
        ));
        assert!(matches!(
            s.peek::<NativeFn>().unwrap_err(),
            DecodeError::MissingField { .. }
        ));
        assert!(matches!(
            s.peek::<HostPtr<u32>>().unwrap_err(),
            DecodeError::NullRequired { .. }
        ));
        s.discard(1);
    }

    #[test]
    fn host_pointers_pass_through_unchanged() {
        let mut s = session();
        let mut target = 77u64;
        let ptr = HostPtr::new(&mut target);
        s.push(ptr);
        let back: HostPtr<u64> = s.pop().unwrap();
        assert_eq!(back, ptr);
        unsafe { *back.as_mut() += 1 };
        assert_eq!(target, 78);

        s.push(Opaque(NonNull::new(ptr.as_ptr().cast::<c_void>()).unwrap()));
        let opaque: Opaque = s.pop().unwrap();
        assert_eq!(opaque.0.as_ptr().cast::<u64>(), ptr.as_ptr());
    }

    unsafe extern "C-unwind" fn native_answer(state: *mut ffi::lua_State) -> c_int {
        ffi::lua_pushnumber(state, 42.0);
        1
    }

    #[test]
    fn native_functions_round_trip() {
        let mut s = session();
        s.push(NativeFn(native_answer));
        let func: NativeFn = s.pop().unwrap();
        assert_eq!(func, NativeFn(native_answer));

        s.push(1i32);
        assert!(matches!(
            s.pop::<NativeFn>().unwrap_err(),
            DecodeError::WrongShape { .. }
        ));
    }

    #[test]
    fn field_reads_keep_stack_balanced() {
        let mut s = session();
        s.new_table();
        s.write_field("c", 77i32).unwrap();
        s.write_field("e", 7.7f64).unwrap();
        assert_eq!(s.depth(), 1);

        assert_eq!(s.read_field::<i32>("c").unwrap(), 77);
        assert_eq!(s.read_field::<Option<String>>("name").unwrap(), None);
        let err = s.read_field::<i32>("missing").unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingField {
                field: "missing".to_string(),
                tag: TypeTag::new(Shape::Number(NumberKind::I32)),
            }
        );
        assert_eq!(s.depth(), 1);

        s.push(5i32);
        assert!(matches!(
            s.read_field::<i32>("c").unwrap_err(),
            DecodeError::WrongShape { found: "number", .. }
        ));
        assert_eq!(s.depth(), 2);
        s.discard(2);
    }

    #[test]
    fn non_number_fields_are_wrong_shape() {
        let mut s = session();
        s.load_and_run_str("shapes", "shapes = { c = {}, e = true }").unwrap();
        s.get_global("shapes").unwrap();

        assert_eq!(
            s.read_field::<i32>("c").unwrap_err(),
            DecodeError::WrongShape {
                expected: TypeTag::new(Shape::Number(NumberKind::I32)),
                found: "table",
            }
        );
        assert!(matches!(
            s.read_field::<f64>("e").unwrap_err(),
            DecodeError::WrongShape { found: "boolean", .. }
        ));
        assert_eq!(s.depth(), 1);
        s.discard(1);
    }

    #[test]
    fn records_read_through_descriptors() {
        let mut s = session();
        s.new_table();
        s.write_field("c", 77i32).unwrap();
        s.write_field("e", 7.7f64).unwrap();
        s.write_field("ok", true).unwrap();

        let fields = [
            FieldDescriptor::new("c", TypeTag::new(Shape::Number(NumberKind::U8))),
            FieldDescriptor::new("e", TypeTag::new(Shape::Number(NumberKind::F64))),
            FieldDescriptor::new("ok", TypeTag::new(Shape::Bool)),
            FieldDescriptor::new("label", TypeTag::new(Shape::Bytes).optional()),
        ];
        let record = s.read_record(&fields).unwrap();
        assert_eq!(record.get("c"), Some(&Value::UInt(77)));
        assert_eq!(record.get("e"), Some(&Value::Float(7.7)));
        assert_eq!(record.get("ok"), Some(&Value::Bool(true)));
        assert_eq!(record.get("label"), Some(&Value::Absent));

        let typed = [FieldDescriptor::new("c", TypeTag::new(Shape::Pointer))];
        assert_eq!(
            s.read_record(&typed).unwrap_err(),
            DecodeError::UnsupportedType("pointer")
        );
        assert_eq!(s.depth(), 1);
    }

    #[test]
    fn dynamic_values_round_trip() {
        let mut s = session();
        for value in [
            Value::Absent,
            Value::Bool(true),
            Value::Int(-77),
            Value::Bytes(b"bytes".to_vec()),
        ] {
            s.push_value(&value);
            let tag = match &value {
                Value::Absent => TypeTag::new(Shape::Bool).optional(),
                Value::Bool(_) => TypeTag::new(Shape::Bool),
                Value::Int(_) => TypeTag::new(Shape::Number(NumberKind::I64)),
                _ => TypeTag::new(Shape::Bytes),
            };
            assert_eq!(s.peek_value(tag).unwrap(), value);
            s.discard(1);
        }
    }

    #[test]
    fn globals_move_through_stack_top() {
        let mut s = session();
        s.push("value");
        s.set_global("answer").unwrap();
        assert_eq!(s.depth(), 0);
        s.get_global("answer").unwrap();
        assert_eq!(s.pop::<String>().unwrap(), "value");
        assert!(matches!(
            s.get_global("bad\0name").unwrap_err(),
            DecodeError::InvalidName { .. }
        ));
    }
}
