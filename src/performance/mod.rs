//! Performance - caching of generated callables
//!
//! Binding generation runs once per (namespace, symbol); every later call
//! reuses the cached program.

pub mod cache;

pub use cache::{CacheKey, CacheStats, CallableCache};
