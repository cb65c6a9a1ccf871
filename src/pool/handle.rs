//! Completion handle for future-style submissions.

use tokio::sync::oneshot;

use crate::error::{QuotaPoolError, Result};

/// Resolves once the task it was returned for has finished, failed
/// admission, or failed to be queued.
#[derive(Debug)]
pub struct TaskHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    /// Queued; the worker reports through the channel
    Queued(oneshot::Receiver<Result<()>>),
    /// Queueing failed
    Rejected(QuotaPoolError),
}

impl TaskHandle {
    pub(crate) fn queued(receiver: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            state: HandleState::Queued(receiver),
        }
    }

    pub(crate) fn rejected(err: QuotaPoolError) -> Self {
        Self {
            state: HandleState::Rejected(err),
        }
    }

    /// Whether queueing already failed.
    pub fn is_rejected(&self) -> bool {
        matches!(self.state, HandleState::Rejected(_))
    }

    /// Wait for the task's outcome.
    ///
    /// A task dropped without running, for example because its worker pool
    /// was torn down, reports [`QuotaPoolError::PoolClosed`].
    pub async fn wait(self) -> Result<()> {
        match self.state {
            HandleState::Queued(receiver) => receiver
                .await
                .unwrap_or(Err(QuotaPoolError::PoolClosed)),
            HandleState::Rejected(err) => Err(err),
        }
    }
}
