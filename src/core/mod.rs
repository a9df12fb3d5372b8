//! Core type model
//!
//! Descriptors for native types and the function signatures built from them.
//! Everything here is immutable once constructed and shared through `Arc`.

pub mod types;
pub mod signature;

pub use types::{
    CallbackInfo, Direction, EnumInfo, FloatWidth, IntWidth, Ownership, RegisteredKind,
    RegisteredType, TypeDescriptor, TypeTag, WrapperClass,
};
pub use signature::{ArgumentSpec, FunctionInfo};
