//! Tests against a live Redis server. Skipped unless `REDIS_URL` is set.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use quotapool::{
    FuncPool, Limiter, LimiterOptions, LimiterRegistry, QuotaStore, RedisStore, TaskContext,
    WindowLimiter,
};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> String {
    let n: u64 = rand::random();
    format!("quotapool_test_{}:", n)
}

async fn connect(url: &str) -> Arc<RedisStore> {
    Arc::new(RedisStore::connect(url).await.unwrap())
}

#[tokio::test]
async fn test_increment_and_peek() {
    let Some(url) = redis_url() else {
        return;
    };
    let store = connect(&url).await;
    let key = format!("{}counter", unique_prefix());
    let period = Duration::from_secs(5);

    assert_eq!(store.peek(&key, period).await.unwrap().count, 0);
    assert_eq!(store.increment(&key, period).await.unwrap().count, 1);
    let state = store.increment(&key, period).await.unwrap();
    assert_eq!(state.count, 2);
    assert!(state.time_until_reset().unwrap() <= period);

    // Peeking never consumes.
    assert_eq!(store.peek(&key, period).await.unwrap().count, 2);
    assert_eq!(store.peek(&key, period).await.unwrap().count, 2);
}

#[tokio::test]
async fn test_window_expires() {
    let Some(url) = redis_url() else {
        return;
    };
    let store = connect(&url).await;
    let key = format!("{}expiring", unique_prefix());
    let period = Duration::from_millis(200);

    store.increment(&key, period).await.unwrap();
    store.increment(&key, period).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(store.peek(&key, period).await.unwrap().count, 0);
    assert_eq!(store.increment(&key, period).await.unwrap().count, 1);
}

#[tokio::test]
async fn test_limiters_on_separate_connections_share_quota() {
    let Some(url) = redis_url() else {
        return;
    };
    let prefix = unique_prefix();
    let build = |store: Arc<RedisStore>| {
        WindowLimiter::new(
            LimiterOptions::new()
                .with_store(store)
                .with_limit(2)
                .with_period(Duration::from_secs(10))
                .with_prefix(prefix.clone()),
        )
        .unwrap()
    };
    let first = build(connect(&url).await);
    let second = build(connect(&url).await);

    assert!(first.try_admit("api").await.unwrap());
    assert!(second.try_admit("api").await.unwrap());
    assert!(!first.try_admit("api").await.unwrap());
    assert!(!second.probe("api").await.unwrap());
}

#[tokio::test]
async fn test_func_pool_over_redis() {
    let Some(url) = redis_url() else {
        return;
    };
    let period = Duration::from_millis(500);
    let registry = LimiterRegistry::new();
    registry
        .register(
            "redis-pool",
            LimiterOptions::new()
                .with_store(connect(&url).await)
                .with_limit(1)
                .with_period(period)
                .with_prefix(unique_prefix()),
        )
        .unwrap();

    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ok = succeeded.clone();
    let bad = failed.clone();
    let pool = FuncPool::new(
        &registry,
        "redis-pool",
        1,
        move |_: u32| {
            let ok = ok.clone();
            async move {
                ok.fetch_add(1, Ordering::SeqCst);
            }
        },
        move |_| {
            bad.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();

    let start = Instant::now();
    for n in 0..3 {
        pool.invoke(TaskContext::background(), n).await.unwrap();
    }
    pool.wait().await;
    pool.release();

    assert!(start.elapsed() >= period * 2 - Duration::from_millis(20));
    assert_eq!(succeeded.load(Ordering::SeqCst), 3);
    assert_eq!(failed.load(Ordering::SeqCst), 0);
}
