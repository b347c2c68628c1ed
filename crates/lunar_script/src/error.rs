//! Error types for the codec, the session and host callables

use crate::codec::TypeTag;
use thiserror::Error;

/// Placeholder field name used when a decode happens directly on the stack
/// top rather than through a named table field.
pub const STACK_TOP: &str = "<stack top>";

/// Errors produced while converting between engine slots and host values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("type '{0}' is not supported on this path")]
    UnsupportedType(&'static str),

    #[error("field '{field}' is absent (expected {tag})")]
    MissingField { field: String, tag: TypeTag },

    #[error("expected {expected}, found {found}")]
    WrongShape { expected: TypeTag, found: &'static str },

    #[error("non-optional {tag} is nil")]
    NullRequired { tag: TypeTag },

    #[error("stack is empty")]
    EmptyStack,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("name '{name}' contains an interior NUL byte")]
    InvalidName { name: String },
}

impl DecodeError {
    /// Attach a table field name to an error raised while decoding that field.
    pub fn in_field(self, name: &str) -> Self {
        match self {
            DecodeError::MissingField { tag, .. } => DecodeError::MissingField {
                field: name.to_string(),
                tag,
            },
            other => other,
        }
    }
}

/// Errors surfaced by an engine session.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine state could not be allocated")]
    StateAllocation,

    #[error("engine rejected JIT mode: {reason}")]
    ModeSetupFailed { reason: String },

    #[error("load failed for '{chunk}': {message}")]
    LoadFailed { chunk: String, message: String },

    #[error("execution failed in '{chunk}': {message}")]
    ExecutionFailed { chunk: String, message: String },

    #[error(transparent)]
    Codec(#[from] DecodeError),
}

/// Errors a host callable reports back to the calling script.
///
/// The message is raised as an ordinary script error, so `pcall` in the
/// script can observe it.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Codec(#[from] DecodeError),

    #[error("expected {expected} argument(s), got {found}")]
    Arity { expected: usize, found: usize },

    #[error("{0}")]
    Message(String),
}

impl CallError {
    /// Error carrying a plain message, raised in the script as-is.
    pub fn msg(message: impl Into<String>) -> Self {
        CallError::Message(message.into())
    }
}
