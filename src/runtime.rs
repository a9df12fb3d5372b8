//! Runtime handle - binds repository functions and runs them
//!
//! A `Runtime` owns everything a call needs: the injected repository and
//! invoker, the native context, the callable cache and the binding options.
//! Several runtimes can coexist; nothing here is process-global.

use crate::builder::{GeneratedCallable, SignatureBuilder};
use crate::config::Config;
use crate::errors::{MarshalError, Result};
use crate::interop::{CallOutput, InteropCounters, InteropStats, NativeContext, NativeInvoker, Value};
use crate::logging;
use crate::performance::{CacheKey, CacheStats, CallableCache};
use crate::repository::Repository;
use std::sync::Arc;

pub struct Runtime {
    repository: Arc<dyn Repository>,
    invoker: Arc<dyn NativeInvoker>,
    context: NativeContext,
    cache: CallableCache,
    config: Config,
    counters: InteropCounters,
}

impl Runtime {
    pub fn new(repository: Arc<dyn Repository>, invoker: Arc<dyn NativeInvoker>) -> Self {
        Self::with_config(repository, invoker, Config::default())
    }

    pub fn with_config(repository: Arc<dyn Repository>, invoker: Arc<dyn NativeInvoker>, config: Config) -> Self {
        Self {
            repository,
            invoker,
            context: NativeContext::new(),
            cache: CallableCache::new(),
            config,
            counters: InteropCounters::new(),
        }
    }

    /// Ensure a namespace is loaded at `version`
    pub fn require(&self, namespace: &str, version: &str) -> Result<()> {
        self.repository.require(namespace, version)
    }

    /// Generated callable for `namespace.name`
    ///
    /// With caching enabled the callable is built once and shared.
    pub fn bind(&self, namespace: &str, name: &str) -> Result<Arc<GeneratedCallable>> {
        let info = self
            .repository
            .function(namespace, name)
            .ok_or_else(|| MarshalError::UnknownFunction {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let build = || {
            let result = SignatureBuilder::new(&info, &self.config.binding).build();
            match &result {
                Ok(callable) => {
                    self.counters.record_binding();
                    logging::log_binding_built(&info.symbol, callable.arity(), callable.step_count());
                }
                Err(err) => logging::log_binding_failed(&info.symbol, &err.to_string()),
            }
            result
        };

        if self.config.cache.enabled {
            self.cache.get_or_build(&CacheKey::new(namespace, info.symbol.as_str()), build)
        } else {
            build().map(Arc::new)
        }
    }

    /// Bind and invoke `namespace.name`
    pub fn call(&self, namespace: &str, name: &str, args: &[Value]) -> Result<CallOutput> {
        let callable = self.bind(namespace, name)?;
        self.counters.record_call();
        let result = callable.call(args, self.invoker.as_ref(), &self.context);
        self.counters.record_cleanup(callable.cleanup_steps().len());
        if let Err(MarshalError::NativeCall { .. }) = &result {
            self.counters.record_native_error();
        }
        result
    }

    /// Shared native services (heap, identity cache, callbacks)
    pub fn context(&self) -> &NativeContext {
        &self.context
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> InteropStats {
        let cache = self.cache.stats();
        self.counters.snapshot(cache.hits as u64, cache.misses as u64)
    }

    /// Drop cached callables, retained callbacks and identity entries
    pub fn teardown(&self) {
        self.cache.clear();
        self.context.callbacks.clear();
        self.context.identity.clear();
        self.counters.reset();
        tracing::debug!("runtime torn down");
    }
}
