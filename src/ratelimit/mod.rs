//! Rate limiting logic and quota stores.

mod backend;
mod limiter;
mod memory;
mod redis_store;
mod store;

pub use backend::{Admission, Limiter};
pub use limiter::{WindowLimiter, DEFAULT_PREFIX};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{QuotaStore, WindowState};
