//! Engine session management
//!
//! A [`Session`] owns one engine state from `init` to drop. It derefs to the
//! engine's [`Stack`], so every codec operation is available on the session
//! directly.

use crate::callable::{self, CallableRegistry};
use crate::codec::NativeFn;
use crate::error::{CallError, EngineError};
use crate::settings::SessionSettings;
use crate::stack::{c_name, Stack};
use mlua::ffi;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use tracing::{debug, warn};

#[cfg(feature = "luajit")]
mod luajit {
    use mlua::ffi::lua_State;
    use std::os::raw::c_int;

    pub(super) const LUAJIT_MODE_ENGINE: c_int = 0;
    pub(super) const LUAJIT_MODE_ON: c_int = 0x0100;

    extern "C-unwind" {
        #[allow(non_snake_case)]
        pub(super) fn luaJIT_setmode(state: *mut lua_State, idx: c_int, mode: c_int) -> c_int;
    }
}

/// Script execution session
pub struct Session {
    stack: Stack,
    settings: SessionSettings,
    callables: CallableRegistry,
}

impl Session {
    /// Create the engine state and apply `settings`.
    pub fn init(settings: SessionSettings) -> Result<Self, EngineError> {
        let state = unsafe { ffi::luaL_newstate() };
        let stack = Stack::from_raw(state).ok_or(EngineError::StateAllocation)?;
        // From here on, dropping the session closes the state.
        let mut session = Self {
            stack,
            settings,
            callables: CallableRegistry::default(),
        };

        if session.settings.open_libs {
            unsafe { ffi::luaL_openlibs(session.stack.state()) };
        }
        if session.settings.jit {
            session.enable_jit()?;
        }

        debug!(
            open_libs = session.settings.open_libs,
            jit = session.settings.jit,
            "script session initialized"
        );
        Ok(session)
    }

    /// Session with default settings.
    pub fn new() -> Result<Self, EngineError> {
        Self::init(SessionSettings::default())
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[cfg(feature = "luajit")]
    fn enable_jit(&mut self) -> Result<(), EngineError> {
        let mode = luajit::LUAJIT_MODE_ENGINE | luajit::LUAJIT_MODE_ON;
        let accepted = unsafe { luajit::luaJIT_setmode(self.stack.state(), 0, mode) };
        if accepted == 0 {
            return Err(EngineError::ModeSetupFailed {
                reason: "engine refused to turn the JIT compiler on".to_string(),
            });
        }
        Ok(())
    }

    #[cfg(not(feature = "luajit"))]
    fn enable_jit(&mut self) -> Result<(), EngineError> {
        Err(EngineError::ModeSetupFailed {
            reason: "engine was built without a JIT compiler".to_string(),
        })
    }

    /// Compile the file at `path` as one chunk and run it to completion.
    ///
    /// Relative paths resolve against `script_root`.
    pub fn load_and_run(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = self.settings.resolve(path.as_ref());
        let chunk = path.display().to_string();
        let source = std::fs::read(&path).map_err(|err| {
            warn!(chunk = %chunk, error = %err, "script could not be read");
            EngineError::LoadFailed {
                chunk: chunk.clone(),
                message: err.to_string(),
            }
        })?;
        self.run_chunk(&chunk, &format!("@{chunk}"), &source)
    }

    /// Compile and run an in-memory chunk.
    pub fn load_and_run_str(&mut self, chunk: &str, source: &str) -> Result<(), EngineError> {
        self.run_chunk(chunk, &format!("={chunk}"), source.as_bytes())
    }

    fn run_chunk(
        &mut self,
        chunk: &str,
        chunk_name: &str,
        source: &[u8],
    ) -> Result<(), EngineError> {
        let chunk_name = c_name(chunk_name)?;
        debug!(chunk, bytes = source.len(), "loading chunk");

        let mut guard = self.stack.scoped();
        guard.reserve(1);
        let state = guard.state();

        let status = unsafe {
            ffi::luaL_loadbuffer(state, source.as_ptr().cast(), source.len(), chunk_name.as_ptr())
        };
        if status != 0 {
            let message = error_message(&guard);
            warn!(chunk, %message, "chunk failed to load");
            return Err(EngineError::LoadFailed {
                chunk: chunk.to_string(),
                message,
            });
        }

        let status = unsafe { ffi::lua_pcall(state, 0, 0, 0) };
        if status != 0 {
            let message = error_message(&guard);
            warn!(chunk, %message, "chunk raised an error");
            return Err(EngineError::ExecutionFailed {
                chunk: chunk.to_string(),
                message,
            });
        }
        Ok(())
    }

    /// Call a global function by name with no arguments.
    pub fn call_global(&mut self, name: &str) -> Result<(), EngineError> {
        let mut guard = self.stack.scoped();
        guard.get_global(name)?;
        let status = unsafe { ffi::lua_pcall(guard.state(), 0, 0, 0) };
        if status != 0 {
            let message = error_message(&guard);
            warn!(function = name, %message, "global call raised an error");
            return Err(EngineError::ExecutionFailed {
                chunk: name.to_string(),
                message,
            });
        }
        Ok(())
    }

    /// Install a host closure as the global function `name`.
    ///
    /// The closure sees only the engine stack: its arguments sit in slots
    /// `1..=arg_count()`, and it returns the number of results it pushed.
    /// An `Err` is raised as a script error carrying the error's message.
    pub fn register_callable<F>(&mut self, name: &str, func: F) -> Result<(), EngineError>
    where
        F: FnMut(&mut Stack) -> Result<usize, CallError> + 'static,
    {
        c_name(name)?;
        let upvalue = self.callables.insert(name, Box::new(func));
        let state = self.stack.state();
        self.stack.reserve(2);
        unsafe {
            ffi::lua_pushlightuserdata(state, upvalue);
            ffi::lua_pushcclosure(state, callable::trampoline, 1);
        }
        self.stack.set_global(name)?;
        debug!(name, registered = self.callables.len(), "host callable registered");
        Ok(())
    }

    /// Install a bare native function as the global `name`.
    pub fn register_native(&mut self, name: &str, func: NativeFn) -> Result<(), EngineError> {
        c_name(name)?;
        self.stack.push(func);
        self.stack.set_global(name)?;
        Ok(())
    }

    /// Close the engine. Equivalent to dropping the session.
    pub fn close(self) {}
}

/// Message of the error object on top of the stack.
fn error_message(stack: &Stack) -> String {
    match stack.peek::<&[u8]>() {
        Ok(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Err(_) => "(error object is not a string)".to_string(),
    }
}

impl Deref for Session {
    type Target = Stack;

    fn deref(&self) -> &Stack {
        &self.stack
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Finalizers may still call host callables, so the registry has to
        // outlive the engine; fields drop after this body runs.
        unsafe { ffi::lua_close(self.stack.state()) };
        debug!("script session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_session_has_no_standard_library() {
        let mut session = Session::init(SessionSettings {
            open_libs: false,
            jit: false,
            script_root: None,
        })
        .unwrap();
        session.get_global("print").unwrap();
        assert_eq!(session.pop::<Option<NativeFn>>().unwrap(), None);
        assert!(session.load_and_run_str("bare", "x = 1 + 1").is_ok());
    }

    #[test]
    fn chunk_errors_carry_engine_message() {
        let mut session = Session::new().unwrap();
        let err = session.load_and_run_str("inline", "return +").unwrap_err();
        match err {
            EngineError::LoadFailed { chunk, message } => {
                assert_eq!(chunk, "inline");
                assert!(message.starts_with("inline:1:"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.depth(), 0);
    }

    #[test]
    fn registered_callables_are_counted() {
        let mut session = Session::new().unwrap();
        session.register_callable("noop", |_stack: &mut Stack| Ok(0)).unwrap();
        session.register_callable("noop2", |_stack: &mut Stack| Ok(0)).unwrap();
        assert_eq!(session.callables.len(), 2);
        assert!(session.register_callable("bad\0", |_stack: &mut Stack| Ok(0)).is_err());
    }
}
