//! Shared quota store trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Snapshot of a fixed window for one counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Units committed in the current window
    pub count: u64,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
}

impl WindowState {
    /// Time left until the window resets, or `None` if it already has.
    pub fn time_until_reset(&self) -> Option<Duration> {
        (self.reset_at - Utc::now())
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
    }
}

/// Trait for stores that keep fixed-window counters shared between callers.
///
/// Implementations must make `increment` atomic for every caller pointed at
/// the same store and key. A window starts at the first increment after the
/// previous one expired and lasts `period`.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Add one unit to `key`'s current window, starting a new window if none
    /// is active, and return the state after the increment.
    async fn increment(&self, key: &str, period: Duration) -> Result<WindowState>;

    /// Read `key`'s current window without consuming a unit.
    ///
    /// A key with no active window reads as a zero count resetting now.
    async fn peek(&self, key: &str, period: Duration) -> Result<WindowState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_until_reset_future() {
        let state = WindowState {
            count: 1,
            reset_at: Utc::now() + chrono::Duration::seconds(5),
        };
        let remaining = state.time_until_reset().unwrap();
        assert!(remaining > Duration::from_secs(4));
        assert!(remaining <= Duration::from_secs(5));
    }

    #[test]
    fn test_time_until_reset_past() {
        let state = WindowState {
            count: 1,
            reset_at: Utc::now() - chrono::Duration::milliseconds(10),
        };
        assert_eq!(state.time_until_reset(), None);
    }
}
