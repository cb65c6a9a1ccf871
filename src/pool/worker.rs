//! Bounded worker pool.
//!
//! A fixed number of tokio tasks drain one bounded queue of jobs. A job that
//! panics is logged and dropped; the worker that ran it keeps serving.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::panic_message;
use crate::error::{QuotaPoolError, Result};

/// A unit of work queued on a [`WorkerPool`].
pub type Job = BoxFuture<'static, ()>;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;

/// Tuning options for a [`WorkerPool`].
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolOptions {
    /// Jobs that may wait in the queue; defaults to the worker count
    pub queue_capacity: Option<usize>,
    /// Reject submissions when the queue is full instead of waiting
    pub nonblocking: bool,
}

impl WorkerPoolOptions {
    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Reject submissions when the queue is full.
    pub fn nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }
}

/// Fixed-size pool of workers running queued jobs.
///
/// Must be created inside a tokio runtime.
pub struct WorkerPool {
    /// Number of workers
    size: usize,
    /// Queue sender; `None` once released
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    /// Fail fast instead of waiting for queue space
    nonblocking: bool,
    /// Worker task handles
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers.
    pub fn new(size: usize, options: WorkerPoolOptions) -> Result<Self> {
        if size == 0 {
            return Err(QuotaPoolError::Config(
                "worker count must be greater than 0".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            QuotaPoolError::Config(format!("worker pool requires a tokio runtime: {}", e))
        })?;

        let capacity = options.queue_capacity.unwrap_or(size).max(1);
        let (sender, receiver) = mpsc::channel::<Job>(capacity);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| runtime.spawn(worker_loop(id, receiver.clone())))
            .collect();

        debug!(
            workers = size,
            queue_capacity = capacity,
            nonblocking = options.nonblocking,
            "Started worker pool"
        );

        Ok(Self {
            size,
            sender: Mutex::new(Some(sender)),
            nonblocking: options.nonblocking,
            workers: Mutex::new(workers),
        })
    }

    /// Number of workers.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Whether the pool has been released.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queue a job.
    ///
    /// Waits for queue space unless the pool is non-blocking, in which case a
    /// full queue fails with [`QuotaPoolError::PoolSaturated`]. A rejected job
    /// is dropped without running.
    pub async fn submit(&self, job: Job) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(QuotaPoolError::PoolClosed)?;

        if self.nonblocking {
            sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => QuotaPoolError::PoolSaturated,
                TrySendError::Closed(_) => QuotaPoolError::PoolClosed,
            })
        } else {
            sender
                .send(job)
                .await
                .map_err(|_| QuotaPoolError::PoolClosed)
        }
    }

    /// Stop accepting jobs. Queued jobs still run, then the workers exit.
    pub fn release(&self) {
        if self.sender.lock().take().is_some() {
            info!(workers = self.size, "Released worker pool");
        }
    }

    /// Wait for every worker to exit. Only returns after [`release`](Self::release).
    pub async fn join(&self) {
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.release();
    }
}

async fn worker_loop(id: usize, receiver: SharedReceiver) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        if let Err(payload) = AssertUnwindSafe(job).catch_unwind().await {
            warn!(
                worker = id,
                panic = %panic_message(payload.as_ref()),
                "Job panicked"
            );
        }
    }
    debug!(worker = id, "Worker exiting");
}
