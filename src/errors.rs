//! Error taxonomy for binding generation and invocation
//!
//! Generation-time errors (`UnsupportedType`, `NotImplemented`) abort building
//! a callable. Call-time errors abort the conversion pipeline, but cleanup
//! still runs for anything already allocated.

use crate::core::types::Direction;
use crate::interop::NativePtr;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MarshalError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("unsupported type for '{name}': {tag} ({direction}){}", detail_suffix(.detail))]
    UnsupportedType {
        name: String,
        tag: String,
        direction: Direction,
        detail: Option<String>,
    },

    #[error("not implemented: {what}")]
    NotImplemented { what: String },

    #[error("array '{name}' must have exactly {expected} elements, got {actual}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{message}")]
    NativeCall {
        message: String,
        domain: String,
        code: i32,
    },

    #[error("cannot wrap null pointer as {context}")]
    IdentityResolution { context: String },

    #[error("invalid value for '{name}': expected {expected}, found {found}")]
    ArgumentType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("{callable} takes {expected} arguments, {found} given")]
    ArityMismatch {
        callable: String,
        expected: usize,
        found: usize,
    },

    #[error("function {namespace}.{name} not found")]
    UnknownFunction { namespace: String, name: String },

    #[error("namespace {namespace} not found")]
    NamespaceNotFound { namespace: String },

    #[error("namespace {namespace} is version {found}, {requested} requested")]
    VersionMismatch {
        namespace: String,
        requested: String,
        found: String,
    },

    #[error("native call failed: {0}")]
    Call(#[from] CallError),

    #[error("native memory: {0}")]
    Memory(#[from] MemoryError),

    #[error("frame slot {slot} holds no {expected} value")]
    Frame { slot: String, expected: &'static str },
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {}", detail),
        None => String::new(),
    }
}

impl MarshalError {
    pub fn unsupported(name: &str, tag: impl ToString, direction: Direction) -> Self {
        Self::UnsupportedType {
            name: name.to_string(),
            tag: tag.to_string(),
            direction,
            detail: None,
        }
    }

    pub fn unsupported_because(
        name: &str,
        tag: impl ToString,
        direction: Direction,
        detail: impl Into<String>,
    ) -> Self {
        Self::UnsupportedType {
            name: name.to_string(),
            tag: tag.to_string(),
            direction,
            detail: Some(detail.into()),
        }
    }

    pub fn not_implemented(what: impl Into<String>) -> Self {
        Self::NotImplemented { what: what.into() }
    }

    pub fn argument_type(name: &str, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::ArgumentType {
            name: name.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Errors raised while generating a binding rather than while calling it
    pub fn is_generation_error(&self) -> bool {
        matches!(self, Self::UnsupportedType { .. } | Self::NotImplemented { .. })
    }
}

/// ABI-level failures reported by a native invoker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("{symbol}: expected {expected} arguments, got {got}")]
    ArgCountMismatch {
        symbol: String,
        expected: usize,
        got: usize,
    },

    #[error("symbol {0} not found")]
    SymbolNotFound(String),

    #[error("{0}")]
    Abi(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("null pointer dereference")]
    NullPointer,

    #[error("{0} is not a live allocation")]
    InvalidPointer(NativePtr),

    #[error("{ptr} holds {found}, expected {expected}")]
    WrongKind {
        ptr: NativePtr,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{ptr} has {available} elements, {requested} requested")]
    OutOfBounds {
        ptr: NativePtr,
        requested: usize,
        available: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message() {
        let err = MarshalError::unsupported_because("x", "gint32", Direction::Out, "caller-allocates");
        assert_eq!(err.to_string(), "unsupported type for 'x': gint32 (out): caller-allocates");
        assert!(err.is_generation_error());

        let err = MarshalError::unsupported("x", "callback", Direction::InOut);
        assert_eq!(err.to_string(), "unsupported type for 'x': callback (inout)");
    }

    #[test]
    fn test_native_call_message_is_native_text() {
        let err = MarshalError::NativeCall {
            message: "No such file".to_string(),
            domain: "g-file-error-quark".to_string(),
            code: 4,
        };
        assert_eq!(err.to_string(), "No such file");
        assert!(!err.is_generation_error());
    }

    #[test]
    fn test_call_error_conversion() {
        let err: MarshalError = CallError::SymbolNotFound("foo".into()).into();
        assert!(matches!(err, MarshalError::Call(CallError::SymbolNotFound(_))));
    }
}
