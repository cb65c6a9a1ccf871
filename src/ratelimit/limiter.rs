//! Fixed-window rate limiter over a shared quota store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::backend::{Admission, Limiter};
use super::store::{QuotaStore, WindowState};
use crate::config::LimiterOptions;
use crate::context::TaskContext;
use crate::error::{QuotaPoolError, Result};

/// Namespace prepended to every counter key unless overridden.
pub const DEFAULT_PREFIX: &str = "quotapool:limiter:";

/// A rate limiter allowing `limit` units per `period` for each key.
///
/// The quota is shared by every limiter pointed at the same store and
/// prefix, so limiters in different processes cooperate through the store.
pub struct WindowLimiter {
    /// Store holding the window counters
    store: Arc<dyn QuotaStore>,
    /// Units allowed per window
    limit: u64,
    /// Window length
    period: Duration,
    /// Counter key namespace
    prefix: String,
}

impl WindowLimiter {
    /// Create a limiter, validating the options.
    pub fn new(options: LimiterOptions) -> Result<Self> {
        let store = options
            .store
            .ok_or_else(|| QuotaPoolError::Config("quota store can't be empty".to_string()))?;
        if options.limit == 0 {
            return Err(QuotaPoolError::Config(
                "limit can't be less than or equal to 0".to_string(),
            ));
        }
        if options.period.is_zero() {
            return Err(QuotaPoolError::Config(
                "period can't be less than or equal to 0".to_string(),
            ));
        }

        Ok(Self {
            store,
            limit: options.limit,
            period: options.period,
            prefix: options.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        })
    }

    /// Units allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Counter key namespace.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Consume one unit, returning whether it fit and the resulting window.
    async fn attempt(&self, counter_key: &str) -> Result<(bool, WindowState)> {
        let state = self.store.increment(counter_key, self.period).await?;
        Ok((state.count <= self.limit, state))
    }
}

#[async_trait]
impl Limiter for WindowLimiter {
    async fn probe(&self, key: &str) -> Result<bool> {
        let state = self.store.peek(&self.counter_key(key), self.period).await?;
        Ok(state.count < self.limit)
    }

    async fn try_admit(&self, key: &str) -> Result<bool> {
        let (admitted, _) = self.attempt(&self.counter_key(key)).await?;
        Ok(admitted)
    }

    async fn admit_blocking(&self, ctx: &TaskContext, key: &str) -> Result<Admission> {
        let counter_key = self.counter_key(key);

        loop {
            if let Some(reason) = ctx.err() {
                return Ok(Admission::Expired(reason));
            }

            let (admitted, state) = match self.attempt(&counter_key).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    warn!(key = %key, error = %e, "Quota store request failed");
                    return Err(e);
                }
            };

            if admitted {
                trace!(key = %key, count = state.count, limit = self.limit, "Admitted");
                return Ok(Admission::Admitted);
            }

            // A window already past its reset means the store raced a boundary.
            let Some(wait) = state.time_until_reset() else {
                tokio::task::yield_now().await;
                continue;
            };

            debug!(
                key = %key,
                count = state.count,
                limit = self.limit,
                wait_ms = wait.as_millis() as u64,
                "Window exhausted, waiting for reset"
            );

            tokio::select! {
                reason = ctx.done() => return Ok(Admission::Expired(reason)),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
