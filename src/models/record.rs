use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal classification of one upstream attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { status: u16 },
    UpstreamError { status: u16 },
    NetworkError { message: String },
    Timeout,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }
}

/// Structured record of one attempt within a logical dispatch.
///
/// Emitted to the request-log sink; persistence and browsing are the
/// embedder's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Identifies the logical dispatch this attempt belongs to
    pub request_id: Uuid,
    /// 1-based attempt index within the dispatch
    pub attempt: u32,
    /// Redacted credential used for this attempt
    pub key: String,
    pub proxy_id: Option<u64>,
    pub proxy_address: Option<String>,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_success_helper() {
        assert!(AttemptOutcome::Success { status: 200 }.is_success());
        assert!(!AttemptOutcome::UpstreamError { status: 503 }.is_success());
        assert!(!AttemptOutcome::Timeout.is_success());
    }

    #[test]
    fn test_record_serializes_tagged_outcome() {
        let record = AttemptRecord {
            request_id: Uuid::nil(),
            attempt: 1,
            key: "sk-a...mnop".to_string(),
            proxy_id: None,
            proxy_address: None,
            outcome: AttemptOutcome::NetworkError {
                message: "connection refused".to_string(),
            },
            latency_ms: 17,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"]["kind"], "network_error");
        assert_eq!(json["outcome"]["message"], "connection refused");
        assert_eq!(json["attempt"], 1);
    }
}
