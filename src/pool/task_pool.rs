//! Future-style pool returning a handle per submitted task.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

use super::admission::run_admitted;
use super::handle::TaskHandle;
use super::worker::{WorkerPool, WorkerPoolOptions};
use crate::context::TaskContext;
use crate::error::Result;
use crate::ratelimit::Limiter;
use crate::registry::LimiterRegistry;

/// Worker pool running arbitrary work once the pool's limiter admits it.
pub struct TaskPool {
    key: String,
    limiter: Arc<dyn Limiter>,
    pool: WorkerPool,
}

impl TaskPool {
    /// Create a pool of `size` workers gated by the limiter registered under `key`.
    pub fn new(registry: &LimiterRegistry, key: &str, size: usize) -> Result<Self> {
        Self::with_options(registry, key, size, WorkerPoolOptions::default())
    }

    /// Like [`new`](TaskPool::new), with explicit worker pool options.
    #[instrument(skip(registry, options))]
    pub fn with_options(
        registry: &LimiterRegistry,
        key: &str,
        size: usize,
        options: WorkerPoolOptions,
    ) -> Result<Self> {
        let limiter = registry.resolve(key)?;
        let pool = WorkerPool::new(size, options)?;

        info!(key = %key, workers = size, "Created task pool");

        Ok(Self {
            key: key.to_string(),
            limiter,
            pool,
        })
    }

    /// Queue `work(arg)` for execution under `ctx`.
    ///
    /// The returned handle resolves with the queueing error straight away if
    /// the task could not be queued, otherwise once the task has run or
    /// failed admission.
    pub async fn submit<T, F, Fut>(&self, ctx: TaskContext, work: F, arg: T) -> TaskHandle
    where
        T: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let key = self.key.clone();
        let limiter = self.limiter.clone();

        let job = async move {
            let outcome = run_admitted(limiter.as_ref(), &key, &ctx, work, arg).await;
            // The handle may have been dropped; nobody is waiting then.
            let _ = tx.send(outcome);
        };

        match self.pool.submit(job.boxed()).await {
            Ok(()) => TaskHandle::queued(rx),
            Err(err) => {
                debug!(key = %self.key, error = %err, "Failed to queue task");
                TaskHandle::rejected(err)
            }
        }
    }

    /// Release the worker pool. Already queued tasks still resolve.
    pub fn release(&self) {
        self.pool.release();
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
