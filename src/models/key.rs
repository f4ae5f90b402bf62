use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API key availability status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    #[default]
    Active,
    Cooldown,
    Disabled,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Cooldown => "cooldown",
            KeyStatus::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(KeyStatus::Active),
            "cooldown" => Some(KeyStatus::Cooldown),
            "disabled" => Some(KeyStatus::Disabled),
            _ => None,
        }
    }

    pub fn is_selectable(&self) -> bool {
        matches!(self, KeyStatus::Active)
    }
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a failed attempt, as reported back to the pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Authentication/authorization rejection. Not transient; the key is
    /// disabled immediately.
    CredentialInvalid,
    /// Timeout, 5xx, or other recoverable upstream failure.
    Transient,
    /// Network-layer failure while a proxy was bound, before the upstream
    /// could have seen the request.
    Proxy,
}

/// Redact a credential for logs and monitoring output.
///
/// Keeps the first and last four characters; short keys are fully masked.
/// Counts characters, not bytes; keys are opaque and may be non-ASCII.
pub fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Monitoring view of one key slot
#[derive(Debug, Clone, Serialize)]
pub struct KeySummary {
    /// Redacted credential, safe to display
    pub key: String,
    pub status: KeyStatus,
    pub consecutive_failures: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
}
