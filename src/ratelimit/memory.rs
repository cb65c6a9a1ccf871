//! In-process quota store.
//!
//! Keeps the same fixed-window semantics as the Redis store, but only shares
//! the quota between callers in one process. Useful for tests and for
//! single-node deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::store::{QuotaStore, WindowState};
use crate::error::Result;

/// A single fixed window counter.
#[derive(Debug)]
struct WindowCounter {
    /// Units counted in the current window
    count: u64,
    /// When the current window started
    window_start: Instant,
    /// Length of the current window
    period: Duration,
}

impl WindowCounter {
    fn new(period: Duration) -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
            period,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.period
    }

    /// Reset the window if it has expired.
    fn maybe_reset_window(&mut self, now: Instant, period: Duration) {
        if self.is_expired(now) {
            self.count = 0;
            self.window_start = now;
            self.period = period;
        }
    }

    fn duration_until_reset(&self, now: Instant) -> Duration {
        let elapsed = now.duration_since(self.window_start);
        self.period.saturating_sub(elapsed)
    }

    fn state(&self, now: Instant) -> WindowState {
        WindowState {
            count: self.count,
            reset_at: reset_instant(self.duration_until_reset(now)),
        }
    }
}

fn reset_instant(remaining: Duration) -> chrono::DateTime<Utc> {
    let remaining = chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero());
    Utc::now() + remaining
}

/// Increments between sweeps of expired counters.
const PRUNE_INTERVAL: u64 = 1024;

/// Quota store backed by a concurrent map of window counters.
///
/// Expired counters are swept every `PRUNE_INTERVAL` increments and dropped
/// when peeked, so keys that stop being used do not accumulate.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, WindowCounter>,
    increments: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every counter.
    pub fn clear(&self) {
        self.counters.clear();
    }

    /// Number of keys with a counter, expired or not.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Drop every counter whose window has expired. Returns how many were dropped.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        let pruned = before.saturating_sub(self.counters.len());
        if pruned > 0 {
            debug!(pruned, remaining = self.counters.len(), "Pruned expired counters");
        }
        pruned
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn increment(&self, key: &str, period: Duration) -> Result<WindowState> {
        let now = Instant::now();
        let state = {
            // The entry guard holds the shard lock, so reset and increment are atomic.
            let mut counter = self
                .counters
                .entry(key.to_string())
                .or_insert_with(|| WindowCounter::new(period));

            counter.maybe_reset_window(now, period);
            counter.count += 1;

            trace!(key = %key, count = counter.count, "Incremented window counter");
            counter.state(now)
        };

        // Sweep only once the guard is gone; retain locks every shard.
        if (self.increments.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_INTERVAL == 0 {
            self.prune_expired();
        }
        Ok(state)
    }

    async fn peek(&self, key: &str, _period: Duration) -> Result<WindowState> {
        let now = Instant::now();
        if let Some(counter) = self.counters.get(key) {
            if !counter.is_expired(now) {
                return Ok(counter.state(now));
            }
        }

        self.counters.remove_if(key, |_, counter| counter.is_expired(now));
        Ok(WindowState {
            count: 0,
            reset_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_counts_within_window() {
        let store = MemoryStore::new();
        let period = Duration::from_secs(10);

        for expected in 1..=3 {
            let state = store.increment("k", period).await.unwrap();
            assert_eq!(state.count, expected);
        }
        assert_eq!(store.peek("k", period).await.unwrap().count, 3);
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let store = MemoryStore::new();
        let period = Duration::from_secs(10);

        assert_eq!(store.peek("k", period).await.unwrap().count, 0);
        assert_eq!(store.peek("k", period).await.unwrap().count, 0);
        assert_eq!(store.counter_count(), 0);
    }

    #[tokio::test]
    async fn test_window_resets_after_period() {
        let store = MemoryStore::new();
        let period = Duration::from_millis(50);

        store.increment("k", period).await.unwrap();
        store.increment("k", period).await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;

        assert_eq!(store.peek("k", period).await.unwrap().count, 0);
        assert_eq!(store.increment("k", period).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_reset_at_is_within_period() {
        let store = MemoryStore::new();
        let period = Duration::from_secs(2);

        let state = store.increment("k", period).await.unwrap();
        let remaining = state.time_until_reset().unwrap();
        assert!(remaining <= period);
        assert!(remaining > Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();
        let period = Duration::from_secs(10);

        store.increment("a", period).await.unwrap();
        store.increment("a", period).await.unwrap();
        store.increment("b", period).await.unwrap();

        assert_eq!(store.peek("a", period).await.unwrap().count, 2);
        assert_eq!(store.peek("b", period).await.unwrap().count, 1);

        store.clear();
        assert_eq!(store.counter_count(), 0);
    }

    #[tokio::test]
    async fn test_prune_expired_keeps_live_windows() {
        let store = MemoryStore::new();

        store.increment("short", Duration::from_millis(20)).await.unwrap();
        store.increment("long", Duration::from_secs(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.prune_expired(), 1);
        assert_eq!(store.counter_count(), 1);
        assert_eq!(store.peek("long", Duration::from_secs(30)).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_peek_drops_expired_counter() {
        let store = MemoryStore::new();
        let period = Duration::from_millis(20);

        store.increment("k", period).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.peek("k", period).await.unwrap().count, 0);
        assert_eq!(store.counter_count(), 0);
    }

    #[tokio::test]
    async fn test_increments_sweep_unused_keys() {
        let store = MemoryStore::new();
        let short = Duration::from_millis(20);

        for i in 0..10 {
            store.increment(&format!("stale-{}", i), short).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        let live = Duration::from_secs(30);
        for _ in 10..PRUNE_INTERVAL {
            store.increment("live", live).await.unwrap();
        }

        assert_eq!(store.counter_count(), 1);
        assert_eq!(store.peek("live", live).await.unwrap().count, PRUNE_INTERVAL - 10);
    }
}
