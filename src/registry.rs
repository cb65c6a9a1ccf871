//! Registry of limiters by logical key.
//!
//! Pools look their limiter up here once, at construction, and keep the
//! instance they found. Replacing an entry only affects pools created later.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::LimiterOptions;
use crate::error::{QuotaPoolError, Result};
use crate::ratelimit::{Limiter, WindowLimiter};

/// Thread-safe mapping from key to limiter.
#[derive(Default)]
pub struct LimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<dyn Limiter>>>,
}

impl LimiterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static LimiterRegistry {
        static GLOBAL: OnceLock<LimiterRegistry> = OnceLock::new();
        GLOBAL.get_or_init(LimiterRegistry::new)
    }

    /// Build a window limiter from `options` and install it under `key`.
    ///
    /// Invalid options leave any existing entry for `key` in place.
    pub fn register(&self, key: impl Into<String>, options: LimiterOptions) -> Result<()> {
        let key = key.into();
        let limiter = WindowLimiter::new(options)?;

        info!(
            key = %key,
            limit = limiter.limit(),
            period_ms = limiter.period().as_millis() as u64,
            "Registering limiter"
        );
        self.register_limiter(key, Arc::new(limiter));
        Ok(())
    }

    /// Install an already built limiter under `key`, replacing any prior one.
    pub fn register_limiter(&self, key: impl Into<String>, limiter: Arc<dyn Limiter>) {
        let key = key.into();
        if self.limiters.write().insert(key.clone(), limiter).is_some() {
            debug!(key = %key, "Replaced existing limiter");
        }
    }

    /// Remove the limiter under `key`. Returns whether one was present.
    pub fn unregister(&self, key: &str) -> bool {
        let removed = self.limiters.write().remove(key).is_some();
        if removed {
            debug!(key = %key, "Unregistered limiter");
        }
        removed
    }

    /// Look up the limiter under `key`.
    pub fn resolve(&self, key: &str) -> Result<Arc<dyn Limiter>> {
        self.limiters
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| QuotaPoolError::LimiterNotFound(key.to_string()))
    }

    /// Whether a limiter is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.limiters.read().contains_key(key)
    }

    /// Number of registered limiters.
    pub fn len(&self) -> usize {
        self.limiters.read().len()
    }

    /// Whether no limiter is registered.
    pub fn is_empty(&self) -> bool {
        self.limiters.read().is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.limiters.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
