//! Quotapool - rate-limited worker pools
//!
//! This crate runs work on bounded pools of concurrent workers whose tasks are
//! only admitted once a fixed-window rate limiter grants quota. The limiter's
//! counters live in a shared store (Redis), so pools in many processes can
//! share one logical quota.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use quotapool::{ErrData, FuncPool, LimiterOptions, LimiterRegistry, RedisStore, TaskContext};
//!
//! # async fn run() -> quotapool::Result<()> {
//! let store = RedisStore::connect("redis://127.0.0.1/").await?;
//! let registry = LimiterRegistry::new();
//! registry.register(
//!     "downstream-api",
//!     LimiterOptions::new()
//!         .with_store(Arc::new(store))
//!         .with_limit(10)
//!         .with_period(Duration::from_secs(1)),
//! )?;
//!
//! let pool = FuncPool::new(
//!     &registry,
//!     "downstream-api",
//!     4,
//!     |job: String| async move { println!("done: {}", job) },
//!     |failure: ErrData<String>| eprintln!("error: {} err: {}", failure.arg, failure.err),
//! )?;
//!
//! for job in ["job1", "job2", "job3"] {
//!     pool.invoke(TaskContext::background(), job.to_string()).await?;
//! }
//! pool.wait().await;
//! pool.release();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod pool;
pub mod ratelimit;
pub mod registry;

pub use config::{LimiterOptions, QuotaPoolConfig};
pub use context::{ContextError, TaskContext};
pub use error::{QuotaPoolError, Result};
pub use pool::{ErrData, FuncPool, TaskHandle, TaskPool, WorkerPoolOptions};
pub use ratelimit::{Admission, Limiter, MemoryStore, QuotaStore, RedisStore, WindowLimiter};
pub use registry::LimiterRegistry;
