//! Daily runtime projection (§5: "the orchestrator checks the projected
//! daily-runtime usage before execution and refuses overage locally").
//! Kept in-process and per-instance, the same scope as
//! [`gateway_auth::NonceLedger`] and [`gateway_auth::ActivationRateLimiter`]
//! — a real multi-instance deployment would project this from
//! `mcp.request.processed` events instead.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RuntimeUsageTracker {
    window: Duration,
    used: Mutex<HashMap<String, Vec<(Instant, i64)>>>,
}

impl RuntimeUsageTracker {
    pub fn new() -> Self {
        Self { window: Duration::from_secs(86_400), used: Mutex::new(HashMap::new()) }
    }

    /// Seconds of runtime `token_hash` has consumed within the rolling
    /// 24-hour window, not counting the request about to run.
    pub fn used_seconds(&self, token_hash: &str) -> i64 {
        let now = Instant::now();
        let mut used = self.used.lock().unwrap();
        let entry = used.entry(token_hash.to_string()).or_default();
        entry.retain(|(t, _)| now.duration_since(*t) < self.window);
        entry.iter().map(|(_, secs)| secs).sum()
    }

    pub fn record(&self, token_hash: &str, seconds: i64) {
        let mut used = self.used.lock().unwrap();
        used.entry(token_hash.to_string()).or_default().push((Instant::now(), seconds));
    }
}

impl Default for RuntimeUsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_usage_for_the_same_token() {
        let tracker = RuntimeUsageTracker::new();
        tracker.record("hash1", 100);
        tracker.record("hash1", 50);
        assert_eq!(tracker.used_seconds("hash1"), 150);
    }

    #[test]
    fn tokens_do_not_share_usage() {
        let tracker = RuntimeUsageTracker::new();
        tracker.record("hash1", 100);
        assert_eq!(tracker.used_seconds("hash2"), 0);
    }
}
