//! Introspection repository - where function descriptions come from
//!
//! The runtime only needs two questions answered: is a namespace loaded at a
//! given version, and what is the description of a named function. Metadata
//! parsing lives behind this trait.

use crate::core::signature::FunctionInfo;
use crate::errors::{MarshalError, Result};
use dashmap::DashMap;
use std::sync::Arc;

pub trait Repository: Send + Sync {
    /// Description of `namespace.name`, if the namespace provides it
    fn function(&self, namespace: &str, name: &str) -> Option<Arc<FunctionInfo>>;

    /// Ensure `namespace` is available at `version`
    fn require(&self, namespace: &str, version: &str) -> Result<()>;
}

/// A loaded namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
    pub version: String,
    pub shared_library: Option<String>,
}

/// In-memory repository populated by registration
#[derive(Default)]
pub struct MemoryRepository {
    namespaces: DashMap<String, Namespace>,
    functions: DashMap<(String, String), Arc<FunctionInfo>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_namespace(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        shared_library: Option<&str>,
    ) {
        let name = name.into();
        self.namespaces.insert(
            name.clone(),
            Namespace {
                name,
                version: version.into(),
                shared_library: shared_library.map(str::to_string),
            },
        );
    }

    /// Register a function under its namespace and managed name
    ///
    /// Registering the same name twice replaces the earlier description.
    pub fn register(&self, info: FunctionInfo) -> Arc<FunctionInfo> {
        let info = Arc::new(info);
        let key = (info.namespace.clone(), info.name.clone());
        self.functions.insert(key, info.clone());
        info
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.namespaces.get(name).map(|entry| entry.value().clone())
    }

    /// Managed names registered for `namespace`, sorted
    pub fn function_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<_> = self
            .functions
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Repository for MemoryRepository {
    fn function(&self, namespace: &str, name: &str) -> Option<Arc<FunctionInfo>> {
        self.functions
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn require(&self, namespace: &str, version: &str) -> Result<()> {
        let loaded = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| MarshalError::NamespaceNotFound {
                namespace: namespace.to_string(),
            })?;
        if loaded.version != version {
            return Err(MarshalError::VersionMismatch {
                namespace: namespace.to_string(),
                requested: version.to_string(),
                found: loaded.version.clone(),
            });
        }
        tracing::debug!(namespace, version, library = ?loaded.shared_library, "namespace required");
        Ok(())
    }
}
