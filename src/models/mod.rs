//! Data types shared across the engine

mod key;
mod proxy;
mod record;

pub use key::{redact_key, FailureKind, KeyStatus, KeySummary};
pub use proxy::{ProbeResult, ProxyDescriptor, ProxyInfo, ProxyStatus};
pub use record::{AttemptOutcome, AttemptRecord};
