//! Callable cache - generated callables keyed by (namespace, symbol)
//!
//! Design: each key owns a `OnceCell`, so concurrent first users of a symbol
//! wait for a single build instead of racing. A failed build leaves the cell
//! empty and is retried by the next caller.

use crate::builder::GeneratedCallable;
use crate::errors::Result;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;

/// Cache key for lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: String,
    pub symbol: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            symbol: symbol.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub builds: usize,
    pub failures: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type Slot = Arc<OnceCell<Arc<GeneratedCallable>>>;

pub struct CallableCache {
    entries: DashMap<CacheKey, Slot>,
    stats: Arc<RwLock<CacheStats>>,
}

impl CallableCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    /// Cached callable for `key`, building it at most once
    pub fn get_or_build<F>(&self, key: &CacheKey, build: F) -> Result<Arc<GeneratedCallable>>
    where
        F: FnOnce() -> Result<GeneratedCallable>,
    {
        // Clone the cell out so no map shard is locked while building
        let slot: Slot = self.entries.entry(key.clone()).or_default().clone();

        if let Some(callable) = slot.get() {
            self.stats.write().hits += 1;
            return Ok(callable.clone());
        }

        let mut built = false;
        let result = slot.get_or_try_init(|| {
            built = true;
            build().map(Arc::new)
        });

        match result {
            Ok(callable) => {
                let mut stats = self.stats.write();
                if built {
                    stats.misses += 1;
                    stats.builds += 1;
                } else {
                    stats.hits += 1;
                }
                Ok(callable.clone())
            }
            Err(err) => {
                {
                    let mut stats = self.stats.write();
                    stats.misses += 1;
                    stats.failures += 1;
                }
                self.entries.remove_if(key, |_, cell| cell.get().is_none());
                Err(err)
            }
        }
    }

    /// Lookup without building
    pub fn get(&self, key: &CacheKey) -> Option<Arc<GeneratedCallable>> {
        self.entries.get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn remove(&self, key: &CacheKey) -> Option<Arc<GeneratedCallable>> {
        self.entries
            .remove(key)
            .and_then(|(_, slot)| slot.get().cloned())
    }

    /// Number of built callables
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        *self.stats.read()
    }
}

impl Default for CallableCache {
    fn default() -> Self {
        Self::new()
    }
}
