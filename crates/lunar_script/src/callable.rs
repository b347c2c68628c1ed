//! Host closures exposed to scripts as global functions
//!
//! Each closure is boxed and owned by the session. The engine only sees a
//! shared native trampoline plus one light-userdata upvalue pointing at the
//! boxed entry, so entries must not move or drop before the engine closes.

use crate::error::CallError;
use crate::stack::Stack;
use mlua::ffi;
use std::cell::RefCell;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};

/// Signature of a host callable.
///
/// The closure reads its arguments with [`Stack::arg`], pushes its results,
/// and returns how many results it pushed.
pub type HostFn = dyn FnMut(&mut Stack) -> Result<usize, CallError>;

struct Entry {
    name: String,
    func: RefCell<Box<HostFn>>,
}

/// Owns every registered closure for the lifetime of one engine.
#[derive(Default)]
pub(crate) struct CallableRegistry {
    entries: Vec<Box<Entry>>,
}

impl CallableRegistry {
    /// Store a closure and return the stable address the engine will hold.
    pub(crate) fn insert(&mut self, name: &str, func: Box<HostFn>) -> *mut c_void {
        let entry = Box::new(Entry {
            name: name.to_string(),
            func: RefCell::new(func),
        });
        let address = &*entry as *const Entry as *mut c_void;
        self.entries.push(entry);
        address
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Check an exact argument count.
pub fn expect_args(stack: &Stack, expected: usize) -> Result<(), CallError> {
    let found = stack.arg_count();
    if found != expected {
        return Err(CallError::Arity { expected, found });
    }
    Ok(())
}

/// Native entry point shared by every host callable.
///
/// Errors and panics from the closure are converted into an engine error
/// raised in the calling script. Nothing with a destructor is alive when the
/// error is raised.
pub(crate) unsafe extern "C-unwind" fn trampoline(state: *mut ffi::lua_State) -> c_int {
    let message = match invoke(state) {
        Ok(results) => return results,
        Err(message) => message,
    };
    ffi::lua_checkstack(state, 1);
    ffi::lua_pushlstring(state, message.as_ptr().cast(), message.len());
    drop(message);
    ffi::lua_error(state)
}

unsafe fn invoke(state: *mut ffi::lua_State) -> Result<c_int, String> {
    let raw = ffi::lua_touserdata(state, ffi::lua_upvalueindex(1)) as *const Entry;
    let Some(entry) = raw.as_ref() else {
        return Err("host callable has no registry entry".to_string());
    };
    let Ok(mut func) = entry.func.try_borrow_mut() else {
        return Err(format!("host callable '{}' re-entered", entry.name));
    };
    let Some(mut stack) = Stack::from_raw(state) else {
        return Err("host callable invoked without an engine".to_string());
    };

    match panic::catch_unwind(AssertUnwindSafe(|| (*func)(&mut stack))) {
        Ok(Ok(results)) if results <= stack.depth() => Ok(results as c_int),
        Ok(Ok(results)) => Err(format!(
            "host callable '{}' returned {results} results but pushed {}",
            entry.name,
            stack.depth()
        )),
        Ok(Err(err)) => Err(format!("{}: {err}", entry.name)),
        Err(_) => Err(format!("host callable '{}' panicked", entry.name)),
    }
}
