//! Callback-style pool running one function per argument.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use super::admission::run_admitted;
use super::panic_message;
use super::worker::{WorkerPool, WorkerPoolOptions};
use crate::context::TaskContext;
use crate::error::{QuotaPoolError, Result};
use crate::ratelimit::Limiter;
use crate::registry::LimiterRegistry;

/// A failed task and the argument it was invoked with.
#[derive(Debug)]
pub struct ErrData<T> {
    /// Argument passed to [`FuncPool::invoke`]
    pub arg: T,
    /// Why the task failed
    pub err: QuotaPoolError,
}

type WorkFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;
type ErrHandler<T> = Arc<dyn Fn(ErrData<T>) + Send + Sync>;

/// Count of queued tasks that have not resolved yet.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    drained: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: self.clone(),
        }
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the two is not missed.
            notified.as_mut().enable();

            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the in-flight count when dropped.
///
/// Travels inside the queued job, so the count drops exactly once whether
/// the job runs to completion or is discarded unrun.
struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}

/// Worker pool that runs a fixed function for each invoked argument, once the
/// pool's limiter admits it.
///
/// Failures (store errors, expiry, panics) are passed to the error handler;
/// successes are silent. [`wait`](FuncPool::wait) blocks until every invoked
/// task has resolved.
pub struct FuncPool<T> {
    key: String,
    limiter: Arc<dyn Limiter>,
    work: WorkFn<T>,
    err_handler: ErrHandler<T>,
    in_flight: Arc<InFlight>,
    pool: WorkerPool,
}

impl<T> FuncPool<T>
where
    T: Clone + Send + 'static,
{
    /// Create a pool of `size` workers gated by the limiter registered under `key`.
    pub fn new<F, Fut, H>(
        registry: &LimiterRegistry,
        key: &str,
        size: usize,
        work: F,
        err_handler: H,
    ) -> Result<Self>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        H: Fn(ErrData<T>) + Send + Sync + 'static,
    {
        Self::with_options(
            registry,
            key,
            size,
            WorkerPoolOptions::default(),
            work,
            err_handler,
        )
    }

    /// Like [`new`](FuncPool::new), with explicit worker pool options.
    #[instrument(skip(registry, options, work, err_handler))]
    pub fn with_options<F, Fut, H>(
        registry: &LimiterRegistry,
        key: &str,
        size: usize,
        options: WorkerPoolOptions,
        work: F,
        err_handler: H,
    ) -> Result<Self>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        H: Fn(ErrData<T>) + Send + Sync + 'static,
    {
        let limiter = registry.resolve(key)?;
        let pool = WorkerPool::new(size, options)?;

        info!(key = %key, workers = size, "Created function pool");

        Ok(Self {
            key: key.to_string(),
            limiter,
            work: Arc::new(move |arg| work(arg).boxed()),
            err_handler: Arc::new(err_handler),
            in_flight: Arc::new(InFlight::default()),
            pool,
        })
    }

    /// Queue `arg` for execution under `ctx`.
    ///
    /// Only queueing can fail here; admission and execution failures go to
    /// the error handler. A task that could not be queued is never run and
    /// does not count as in flight.
    pub async fn invoke(&self, ctx: TaskContext, arg: T) -> Result<()> {
        let guard = self.in_flight.enter();
        let key = self.key.clone();
        let limiter = self.limiter.clone();
        let work = self.work.clone();
        let err_handler = self.err_handler.clone();

        let job = async move {
            // Dropped last, after the outcome has been reported.
            let _guard = guard;
            let reported = arg.clone();

            let outcome = run_admitted(limiter.as_ref(), &key, &ctx, |a| work(a), arg).await;
            if let Err(err) = outcome {
                report_failure(&err_handler, ErrData { arg: reported, err });
            }
        };

        self.pool.submit(job.boxed()).await
    }

    /// Wait until every invoked task has resolved.
    pub async fn wait(&self) {
        self.in_flight.wait_idle().await;
    }

    /// Release the worker pool. Already queued tasks still resolve.
    pub fn release(&self) {
        self.pool.release();
    }

    /// Number of queued tasks that have not resolved yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// The limiter key this pool is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The limiter resolved when the pool was created.
    pub fn limiter(&self) -> &Arc<dyn Limiter> {
        &self.limiter
    }
}

fn report_failure<T>(err_handler: &ErrHandler<T>, data: ErrData<T>) {
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| err_handler(data))) {
        warn!(panic = %panic_message(payload.as_ref()), "Error handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterOptions;
    use crate::ratelimit::MemoryStore;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn create_registry(key: &str, limit: u64, period: Duration) -> LimiterRegistry {
        let registry = LimiterRegistry::new();
        registry
            .register(
                key,
                LimiterOptions::new()
                    .with_store(Arc::new(MemoryStore::new()))
                    .with_limit(limit)
                    .with_period(period),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let registry = LimiterRegistry::new();
        let result = FuncPool::new(&registry, "missing", 1, |_: u32| async {}, |_| {});
        assert!(matches!(result, Err(QuotaPoolError::LimiterNotFound(_))));
    }

    #[tokio::test]
    async fn test_invoke_runs_and_waits() {
        let registry = create_registry("k", 100, Duration::from_secs(10));
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();

        let pool = FuncPool::new(
            &registry,
            "k",
            3,
            move |arg: u32| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(arg);
                }
            },
            |data| panic!("unexpected failure: {}", data.err),
        )
        .unwrap();

        for i in 0..10 {
            pool.invoke(TaskContext::background(), i).await.unwrap();
        }
        pool.wait().await;

        let mut seen = results.lock().clone();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(pool.in_flight(), 0);
        pool.release();
    }

    #[tokio::test]
    async fn test_failures_reach_handler() {
        let registry = create_registry("k", 100, Duration::from_secs(10));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();

        let pool = FuncPool::new(
            &registry,
            "k",
            1,
            |arg: &'static str| async move {
                if arg == "bad" {
                    panic!("bad argument");
                }
            },
            move |data: ErrData<&'static str>| sink.lock().push((data.arg, data.err.to_string())),
        )
        .unwrap();

        let expired = TaskContext::background();
        expired.cancel();

        pool.invoke(TaskContext::background(), "good").await.unwrap();
        pool.invoke(TaskContext::background(), "bad").await.unwrap();
        pool.invoke(expired, "late").await.unwrap();
        pool.wait().await;

        let mut failures = failures.lock().clone();
        failures.sort();
        assert_eq!(
            failures,
            vec![
                ("bad", "panic: bad argument".to_string()),
                ("late", "task expired".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_worker() {
        let registry = create_registry("k", 100, Duration::from_secs(10));
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();

        let pool = FuncPool::new(
            &registry,
            "k",
            1,
            move |_: u32| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
            |_| panic!("handler exploded"),
        )
        .unwrap();

        let expired = TaskContext::background();
        expired.cancel();
        pool.invoke(expired, 1).await.unwrap();
        pool.invoke(TaskContext::background(), 2).await.unwrap();
        pool.wait().await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_invoke_is_not_in_flight() {
        let registry = create_registry("k", 100, Duration::from_secs(10));
        let pool = FuncPool::new(&registry, "k", 1, |_: u32| async {}, |_| {}).unwrap();

        pool.release();
        let result = pool.invoke(TaskContext::background(), 1).await;

        assert!(matches!(result, Err(QuotaPoolError::PoolClosed)));
        assert_eq!(pool.in_flight(), 0);
        tokio::time::timeout(Duration::from_secs(1), pool.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_with_nothing_in_flight() {
        let registry = create_registry("k", 1, Duration::from_secs(10));
        let pool = FuncPool::new(&registry, "k", 1, |_: u32| async {}, |_| {}).unwrap();

        tokio::time::timeout(Duration::from_millis(100), pool.wait())
            .await
            .unwrap();
    }
}
