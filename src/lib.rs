//! gimarshal - marshaling plans for introspected native functions
//!
//! Given the description of a native function (parameters, directions,
//! ownership, array length links, error reporting), this crate generates a
//! callable that converts managed arguments to native ones, invokes the
//! function and converts the results back, releasing whatever the binding
//! side owns.

// Core modules
pub mod core;
pub mod builder;
pub mod interop;
pub mod errors;
pub mod config;
pub mod logging;
pub mod performance;
pub mod repository;
pub mod runtime;

// Re-export commonly used items
pub use crate::core::{ArgumentSpec, Direction, FunctionInfo, Ownership, TypeDescriptor, TypeTag};
pub use builder::{GeneratedCallable, SignatureBuilder};
pub use interop::{CallOutput, NativeContext, NativeInvoker, NativePtr, NativeValue, SymbolTable, Value};
pub use errors::{CallError, ConfigError, MarshalError, MemoryError, Result};
pub use config::Config;
pub use performance::CallableCache;
pub use repository::{MemoryRepository, Repository};
pub use runtime::Runtime;
