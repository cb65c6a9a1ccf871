//! Limiter trait shared by every rate limiter implementation.

use async_trait::async_trait;

use crate::context::{ContextError, TaskContext};
use crate::error::Result;

/// Outcome of a blocking admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The caller may proceed; one unit of quota was consumed.
    Admitted,
    /// The caller's context ended before quota became available.
    Expired(ContextError),
}

impl Admission {
    /// Whether the caller was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Trait for rate limiter implementations.
///
/// Pools hold limiters as `Arc<dyn Limiter>` and call them from many workers
/// at once, so implementations must be safe to share.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Report whether `key` has quota left in its current window.
    ///
    /// Probing never consumes a unit.
    async fn probe(&self, key: &str) -> Result<bool>;

    /// Consume one unit for `key` if the current window allows it.
    async fn try_admit(&self, key: &str) -> Result<bool>;

    /// Wait until `key` is admitted or `ctx` ends.
    ///
    /// Store failures are returned as errors and never retried. An ended
    /// context is reported as [`Admission::Expired`], not as an error.
    async fn admit_blocking(&self, ctx: &TaskContext, key: &str) -> Result<Admission>;
}
