//! Admission and execution shared by both pool flavours.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, warn};

use super::panic_message;
use crate::context::TaskContext;
use crate::error::{QuotaPoolError, Result};
use crate::ratelimit::{Admission, Limiter};

/// Wait for admission on `key`, then run `work(arg)` with panics contained.
///
/// Store failures are returned as they are, an ended context becomes
/// [`QuotaPoolError::TaskExpired`] and a panic in `work` becomes
/// [`QuotaPoolError::Panicked`]. `work` is never called unless admitted.
pub(crate) async fn run_admitted<T, F, Fut>(
    limiter: &dyn Limiter,
    key: &str,
    ctx: &TaskContext,
    work: F,
    arg: T,
) -> Result<()>
where
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = ()>,
{
    match limiter.admit_blocking(ctx, key).await? {
        Admission::Admitted => {}
        Admission::Expired(reason) => {
            debug!(key = %key, reason = %reason, "Task expired before admission");
            return Err(QuotaPoolError::TaskExpired);
        }
    }

    // Building the future can panic too, so call `work` inside the guarded scope.
    AssertUnwindSafe(async move { work(arg).await })
        .catch_unwind()
        .await
        .map_err(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(key = %key, panic = %message, "Task panicked");
            QuotaPoolError::Panicked(message)
        })
}
