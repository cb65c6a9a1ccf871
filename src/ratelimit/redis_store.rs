//! Redis-backed quota store.
//!
//! Window counters live in Redis so every process pointed at the same server
//! shares one quota. Increment and expiry run inside Lua scripts, which Redis
//! executes atomically.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, trace};

use super::store::{QuotaStore, WindowState};
use crate::error::Result;

const INCREMENT_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
local ttl = redis.call("PTTL", KEYS[1])

if count == 1 or ttl < 0 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end

return {count, ttl}
"#;

const PEEK_SCRIPT: &str = r#"
local value = redis.call("GET", KEYS[1])
if not value then
    return {0, 0}
end

local ttl = redis.call("PTTL", KEYS[1])
if ttl < 0 then
    ttl = 0
end

return {tonumber(value), ttl}
"#;

/// Quota store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    increment_script: Script,
    peek_script: Script,
}

impl RedisStore {
    /// Create a store from an existing connection manager.
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_manager,
            increment_script: Script::new(INCREMENT_SCRIPT),
            peek_script: Script::new(PEEK_SCRIPT),
        }
    }

    /// Create a store from a client, opening a managed connection.
    pub async fn from_client(client: Client) -> Result<Self> {
        let connection_manager = client.get_connection_manager().await?;
        Ok(Self::new(connection_manager))
    }

    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        debug!(url = %url, "Connecting to Redis quota store");
        let client = Client::open(url)?;
        Self::from_client(client).await
    }
}

fn window_state(count: u64, ttl_ms: i64) -> WindowState {
    let ttl_ms = ttl_ms.max(0);
    WindowState {
        count,
        reset_at: Utc::now() + chrono::Duration::milliseconds(ttl_ms),
    }
}

fn period_millis(period: Duration) -> u64 {
    // PEXPIRE rejects zero, and sub-millisecond periods round down to it.
    (period.as_millis() as u64).max(1)
}

#[async_trait]
impl QuotaStore for RedisStore {
    async fn increment(&self, key: &str, period: Duration) -> Result<WindowState> {
        let mut connection_manager = self.connection_manager.clone();

        let (count, ttl_ms): (u64, i64) = self
            .increment_script
            .key(key)
            .arg(period_millis(period))
            .invoke_async(&mut connection_manager)
            .await?;

        trace!(key = %key, count = count, ttl_ms = ttl_ms, "Incremented Redis window");
        Ok(window_state(count, ttl_ms))
    }

    async fn peek(&self, key: &str, _period: Duration) -> Result<WindowState> {
        let mut connection_manager = self.connection_manager.clone();

        let (count, ttl_ms): (u64, i64) = self
            .peek_script
            .key(key)
            .invoke_async(&mut connection_manager)
            .await?;

        Ok(window_state(count, ttl_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_millis_never_zero() {
        assert_eq!(period_millis(Duration::from_micros(10)), 1);
        assert_eq!(period_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_window_state_clamps_negative_ttl() {
        let before = Utc::now();
        let state = window_state(4, -1);
        assert_eq!(state.count, 4);
        assert!(state.reset_at >= before);
        assert_eq!(state.time_until_reset(), None);
    }
}
