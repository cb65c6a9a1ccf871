//! Admission-controlled worker pools.
//!
//! Both pool flavours queue work on a bounded [`WorkerPool`] and only admit it
//! to run once the pool's limiter grants quota:
//!
//! - [`FuncPool`] runs one fixed function and reports failures to a handler.
//! - [`TaskPool`] runs arbitrary work and returns a [`TaskHandle`] per task.

mod admission;
mod func_pool;
mod handle;
mod task_pool;
mod worker;

pub use func_pool::{ErrData, FuncPool};
pub use handle::TaskHandle;
pub use task_pool::TaskPool;
pub use worker::{Job, WorkerPool, WorkerPoolOptions};

use std::any::Any;

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
