//! Configuration management for quotapool.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{QuotaPoolError, Result};
use crate::pool::WorkerPoolOptions;
use crate::ratelimit::{MemoryStore, QuotaStore, RedisStore};
use crate::registry::LimiterRegistry;

/// Options for building a window limiter.
#[derive(Clone, Default)]
pub struct LimiterOptions {
    /// Store holding the shared window counters
    pub store: Option<Arc<dyn QuotaStore>>,
    /// Units allowed per window
    pub limit: u64,
    /// Window length
    pub period: Duration,
    /// Counter key namespace; the default prefix is used when unset
    pub prefix: Option<String>,
}

impl LimiterOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backing store.
    pub fn with_store(mut self, store: Arc<dyn QuotaStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the number of units allowed per window.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Set the window length.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the counter key namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl fmt::Debug for LimiterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterOptions")
            .field("store", &self.store.as_ref().map(|_| "<store>"))
            .field("limit", &self.limit)
            .field("period", &self.period)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Main configuration file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaPoolConfig {
    /// Quota store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Default worker pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Limiters to register, by key
    #[serde(default)]
    pub limiters: BTreeMap<String, LimiterConfig>,
}

/// Quota store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL; the in-process store is used when unset
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Concurrent workers per pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queue capacity; defaults to the worker count
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Reject submissions when the queue is full instead of waiting
    #[serde(default)]
    pub nonblocking: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: None,
            nonblocking: false,
        }
    }
}

fn default_workers() -> usize {
    4
}

impl PoolConfig {
    /// Worker pool options described by this configuration.
    pub fn worker_options(&self) -> WorkerPoolOptions {
        WorkerPoolOptions {
            queue_capacity: self.queue_capacity,
            nonblocking: self.nonblocking,
        }
    }
}

/// Configuration for one limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Units allowed per window
    pub limit: u64,
    /// Window length in milliseconds
    pub period_ms: u64,
    /// Optional counter key namespace
    #[serde(default)]
    pub prefix: Option<String>,
}

impl LimiterConfig {
    /// Limiter options for this entry, backed by `store`.
    pub fn to_options(&self, store: Arc<dyn QuotaStore>) -> LimiterOptions {
        let options = LimiterOptions::new()
            .with_store(store)
            .with_limit(self.limit)
            .with_period(Duration::from_millis(self.period_ms));

        match &self.prefix {
            Some(prefix) => options.with_prefix(prefix.clone()),
            None => options,
        }
    }
}

impl QuotaPoolConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading quotapool configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| QuotaPoolError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Open the configured quota store.
    pub async fn connect_store(&self) -> Result<Arc<dyn QuotaStore>> {
        match &self.store.redis_url {
            Some(url) => Ok(Arc::new(RedisStore::connect(url).await?)),
            None => {
                info!("No Redis URL configured, using the in-process quota store");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    /// Register every configured limiter in `registry`.
    ///
    /// Stops at the first invalid entry; entries registered before it stay.
    pub fn register_all(
        &self,
        registry: &LimiterRegistry,
        store: Arc<dyn QuotaStore>,
    ) -> Result<()> {
        for (key, limiter) in &self.limiters {
            registry.register(key, limiter.to_options(store.clone()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
store:
  redis_url: redis://127.0.0.1:6379
pool:
  workers: 8
  nonblocking: true
limiters:
  payments:
    limit: 10
    period_ms: 1000
  search:
    limit: 2
    period_ms: 500
    prefix: "search:"
"#;
        let config = QuotaPoolConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.pool.workers, 8);
        assert!(config.pool.nonblocking);
        assert_eq!(config.limiters.len(), 2);
        assert_eq!(config.limiters["search"].prefix.as_deref(), Some("search:"));
    }

    #[test]
    fn test_defaults() {
        let config = QuotaPoolConfig::from_yaml("{}").unwrap();
        assert!(config.store.redis_url.is_none());
        assert_eq!(config.pool.workers, 4);
        assert!(config.pool.queue_capacity.is_none());
        assert!(config.limiters.is_empty());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = QuotaPoolConfig::from_yaml("limiters: [1, 2").unwrap_err();
        assert!(matches!(err, QuotaPoolError::Config(_)));
    }

    #[test]
    fn test_register_all() {
        let yaml = r#"
limiters:
  a:
    limit: 1
    period_ms: 1000
  b:
    limit: 5
    period_ms: 200
"#;
        let config = QuotaPoolConfig::from_yaml(yaml).unwrap();
        let registry = LimiterRegistry::new();
        config
            .register_all(&registry, Arc::new(MemoryStore::new()))
            .unwrap();

        assert!(registry.contains("a"));
        assert!(registry.contains("b"));
    }

    #[test]
    fn test_register_all_rejects_zero_limit() {
        let yaml = r#"
limiters:
  broken:
    limit: 0
    period_ms: 1000
"#;
        let config = QuotaPoolConfig::from_yaml(yaml).unwrap();
        let registry = LimiterRegistry::new();
        let result = config.register_all(&registry, Arc::new(MemoryStore::new()));

        assert!(matches!(result, Err(QuotaPoolError::Config(_))));
        assert!(registry.is_empty());
    }
}
