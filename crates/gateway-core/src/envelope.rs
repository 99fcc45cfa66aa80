//! The permission envelope derived from a token's latest non-revoked grant
//! (§4.3, §9 glossary: "Envelope").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionEnvelope {
    pub username: String,
    pub allowed_tools: HashSet<String>,
    pub max_rows: i64,
    pub daily_runtime_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

impl PermissionEnvelope {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.contains(tool)
    }

    /// `min(plan.top_n, envelope.max_rows)`, the hard cap the executor
    /// applies regardless of what the plan requested (§4.6).
    pub fn clamp_rows(&self, requested: i64) -> i64 {
        requested.min(self.max_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn envelope() -> PermissionEnvelope {
        PermissionEnvelope {
            username: "alice".into(),
            allowed_tools: ["query".to_string()].into_iter().collect(),
            max_rows: 500,
            daily_runtime_seconds: 300,
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn clamps_to_max_rows() {
        let e = envelope();
        assert_eq!(e.clamp_rows(10_000), 500);
        assert_eq!(e.clamp_rows(10), 10);
    }

    #[test]
    fn expiry_is_exclusive_of_now() {
        let mut e = envelope();
        e.expires_at = Utc::now() - Duration::seconds(1);
        assert!(e.is_expired(Utc::now()));
    }
}
