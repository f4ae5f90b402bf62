//! Credential pool and per-key admission control

mod limiter;
mod pool;

pub use limiter::{Admission, RateLimitConfig, RateLimiter};
pub use pool::{KeyHandle, KeyPool, KeyPoolConfig, KeySlot};
