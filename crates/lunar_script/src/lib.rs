//! Lunar Scripting Layer
//!
//! Typed marshalling between Rust values and an embedded Lua engine
//! (LuaJIT by default, Lua 5.4 with `--no-default-features --features lua54`).
//!
//! ## Architecture
//!
//! - **Codec:** sealed `Encode`/`Decode` traits, one rule per supported
//!   `TypeTag`; unsupported host types fail to compile
//! - **Stack:** balanced push/pop/field access over the engine stack
//! - **Session:** owns the engine, runs script files, exposes host closures
//!
//! The engine is single-threaded: `Session` and `Stack` are neither `Send`
//! nor `Sync`.

pub mod callable;
pub mod codec;
pub mod error;
pub mod record;
pub mod session;
pub mod settings;
pub mod stack;
pub mod value;

pub use callable::{expect_args, HostFn};
pub use codec::{
    Decode, DecodeOwned, Encode, HostPtr, NativeFn, NumberKind, Opaque, Shape, Tagged, TypeTag,
};
pub use error::{CallError, DecodeError, EngineError};
pub use record::{FieldDescriptor, LuaStruct, Record};
pub use session::Session;
pub use settings::SessionSettings;
pub use stack::{Slot, Stack};
pub use value::Value;

pub use mlua::ffi;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
