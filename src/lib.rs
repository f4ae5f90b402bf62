//! Rotor - Credential Rotation & Request Dispatch Engine
//!
//! The hard core of an API-key balancing gateway:
//!
//! - Round-robin rotation over a pool of upstream API keys, with cooldown
//!   and disable semantics driven by failure classification
//! - An optional pool of outbound HTTP proxies (`IP:PORT:USER:PASS`
//!   descriptors) with active health checking and latency-aware selection
//! - Per-key token-bucket rate limiting with lazy, timer-free refill
//! - A dispatcher that retries recoverable failures with a different key,
//!   bounded by a retry budget, and emits structured attempt records
//!
//! The web/admin surface that embeds this engine is out of scope; it calls
//! [`Dispatcher::dispatch`] and the pools' administrative operations, and
//! consumes attempt records from the broadcast sink.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod keys;
pub mod models;
pub mod proxies;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{init_tracing, Config};
pub use dispatch::{
    DispatchConfig, DispatchOutcome, Dispatcher, HttpUpstream, Upstream, UpstreamConfig,
    UpstreamRequest, UpstreamResponse,
};
pub use error::{DescriptorError, Result, RotorError};
pub use keys::{Admission, KeyPool, KeyPoolConfig, RateLimitConfig, RateLimiter};
pub use models::{AttemptOutcome, AttemptRecord, FailureKind, KeyStatus, ProxyStatus};
pub use proxies::{HealthCheckConfig, HealthChecker, HealthCheckerHandle, ProxyPool};
