use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proxy health status
///
/// Transitions only via explicit health-check outcomes or accumulated
/// real-traffic failures; parse-invalid descriptors never reach the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    #[default]
    Untested,
    Active,
    Inactive,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::Untested => "untested",
            ProxyStatus::Active => "active",
            ProxyStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "untested" => Some(ProxyStatus::Untested),
            "active" => Some(ProxyStatus::Active),
            "inactive" => Some(ProxyStatus::Inactive),
            _ => None,
        }
    }

    /// Untested entries are eligible for optimistic use and get
    /// reclassified on outcome.
    pub fn is_selectable(&self) -> bool {
        matches!(self, ProxyStatus::Untested | ProxyStatus::Active)
    }
}

impl std::fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validated `IP:PORT:USER:PASS` proxy descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    pub ip: Ipv4Addr,
    pub port: u16,
    #[serde(skip_serializing)]
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl ProxyDescriptor {
    /// `ip:port` endpoint without credentials, safe to display.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Wire representation, byte-compatible with the import format.
    pub fn to_line(&self) -> String {
        format!("{}:{}:{}:{}", self.ip, self.port, self.username, self.password)
    }
}

/// Monitoring snapshot of one pool entry
#[derive(Debug, Clone, Serialize)]
pub struct ProxyInfo {
    pub id: u64,
    pub address: String,
    pub status: ProxyStatus,
    pub latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of a single health probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub status: ProxyStatus,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            status: ProxyStatus::Active,
            latency_ms,
            error: None,
        }
    }

    pub fn unhealthy(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            status: ProxyStatus::Inactive,
            latency_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ProxyStatus::Active
    }
}
