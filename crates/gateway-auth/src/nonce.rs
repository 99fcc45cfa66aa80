//! Replay ledger (§4.3): a `(token_hash, nonce)` pair that reappears within
//! the configured window fails validation with `replay_detected`. This is a
//! rolling-window projection kept in-process per gateway instance rather
//! than a warehouse round trip — a single gateway process serves a session's
//! entire connection lifetime, so there is no cross-process sharing
//! requirement within the replay window (§9 open question on revocation
//! visibility applies the same reasoning).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct NonceLedger {
    window: Duration,
    seen: Mutex<HashMap<(String, String), Instant>>,
}

impl NonceLedger {
    pub fn new(window: Duration) -> Self {
        Self { window, seen: Mutex::new(HashMap::new()) }
    }

    /// Returns `true` if `(token_hash, nonce)` has not been seen within the
    /// window, recording it as seen. Returns `false` on replay.
    pub fn check_and_record(&self, token_hash: &str, nonce: &str) -> bool {
        let key = (token_hash.to_string(), nonce.to_string());
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, seen_at| now.duration_since(*seen_at) < self.window);
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_use_of_same_nonce_is_rejected() {
        let ledger = NonceLedger::new(Duration::from_secs(600));
        assert!(ledger.check_and_record("hash1", "abc123"));
        assert!(!ledger.check_and_record("hash1", "abc123"));
    }

    #[test]
    fn different_tokens_do_not_collide_on_the_same_nonce() {
        let ledger = NonceLedger::new(Duration::from_secs(600));
        assert!(ledger.check_and_record("hash1", "abc123"));
        assert!(ledger.check_and_record("hash2", "abc123"));
    }
}
