//! Proxy descriptor parsing, pool management, and health checking

pub mod health;
pub mod parser;
mod pool;

pub use health::{HealthCheckConfig, HealthChecker, HealthCheckerHandle};
pub use parser::{BatchParse, RejectedLine};
pub use pool::{AddReport, ProxyHandle, ProxyOutcome, ProxyPool, ProxySlot};
