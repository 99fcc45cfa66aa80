//! Activation link flow (§6): a one-time code that exchanges for a token
//! without the user ever handling the raw token value during onboarding.

use crate::role_template::RoleTemplate;
use crate::token::{IssuedToken, TokenIdentityService};
use chrono::{Duration as ChronoDuration, Utc};
use gateway_core::events::EventKind;
use gateway_core::{GatewayError, GatewayResult};
use gateway_warehouse::reader::ConsistencyReader;
use gateway_warehouse::EventLogger;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::instrument;

const CODE_LEN: usize = 24;

fn generate_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789"; // no 0/O/1/I
    let mut rng = rand::thread_rng();
    (0..CODE_LEN).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

/// Leaky-bucket-shaped rate limiter: 10 activations per IP per 15 minutes
/// (§6). Kept in-process, mirroring [`crate::nonce::NonceLedger`]'s
/// single-instance scope.
pub struct ActivationRateLimiter {
    window: Duration,
    cap: u32,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl ActivationRateLimiter {
    pub fn new() -> Self {
        Self { window: Duration::from_secs(15 * 60), cap: 10, hits: Mutex::new(HashMap::new()) }
    }

    pub fn allow(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap();
        let entry = hits.entry(ip.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() as u32 >= self.cap {
            return false;
        }
        entry.push(now);
        true
    }
}

impl Default for ActivationRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ActivationService {
    logger: EventLogger,
    reader: Arc<ConsistencyReader>,
    tokens: Arc<TokenIdentityService>,
    pub rate_limiter: ActivationRateLimiter,
}

impl ActivationService {
    pub fn new(logger: EventLogger, reader: Arc<ConsistencyReader>, tokens: Arc<TokenIdentityService>) -> Self {
        Self { logger, reader, tokens, rate_limiter: ActivationRateLimiter::new() }
    }

    /// Creates a one-time activation code, valid for `ttl` (§6).
    #[instrument(skip(self))]
    pub async fn create(&self, username: &str, token_template: RoleTemplate, ttl: ChronoDuration) -> GatewayResult<String> {
        let code = generate_code();
        self.logger
            .log(EventKind::ActivationCreated {
                code: code.clone(),
                username: username.to_string(),
                token_template: token_template.name().to_string(),
                activation_expires_at: Utc::now() + ttl,
            })
            .await?;
        Ok(code)
    }

    /// `POST /activate/<code>` (§6): validates the code, issues a token, and
    /// marks the code used. Returns the issued token and the username to
    /// build the `claudecode://activate?token=...&user=...` redirect.
    #[instrument(skip(self))]
    pub async fn consume(&self, code: &str) -> GatewayResult<(IssuedToken, String)> {
        let history = self.reader.read_object("activation", &format!("activation/{code}")).await?;

        let Some(created) = history
            .iter()
            .filter(|row| row.event.action == "system.activation.created")
            .max_by_key(|row| row.event.occurred_at)
        else {
            return Err(GatewayError::InvalidToken);
        };

        let already_used = history.iter().any(|row| row.event.action == "system.activation.used");
        if already_used {
            return Err(GatewayError::Revoked);
        }

        let attrs: ActivationAttrs = serde_json::from_value(created.event.attributes.clone())
            .map_err(|e| GatewayError::BadSchemaContract { message: e.to_string() })?;

        if attrs.activation_expires_at <= Utc::now() {
            return Err(GatewayError::Expired);
        }

        let template = RoleTemplate::from_name(&attrs.token_template).ok_or_else(|| GatewayError::BadSchemaContract {
            message: format!("unknown token_template {}", attrs.token_template),
        })?;

        let issued = self.tokens.issue(&attrs.username, template, ChronoDuration::days(90)).await?;

        self.logger
            .log(EventKind::TokenCreated {
                username: attrs.username.clone(),
                token_prefix: issued.prefix.clone(),
                token_suffix: issued.suffix.clone(),
            })
            .await?;
        self.logger
            .log(EventKind::ActivationUsed { code: code.to_string(), username: attrs.username.clone() })
            .await?;

        Ok((issued, attrs.username))
    }
}

#[derive(serde::Deserialize)]
struct ActivationAttrs {
    username: String,
    token_template: String,
    activation_expires_at: chrono::DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_uses_unambiguous_alphabet() {
        let code = generate_code();
        assert_eq!(code.len(), CODE_LEN);
        assert!(!code.contains('0') && !code.contains('O') && !code.contains('1') && !code.contains('I'));
    }

    #[test]
    fn rate_limiter_caps_at_ten_per_window() {
        let limiter = ActivationRateLimiter::new();
        for _ in 0..10 {
            assert!(limiter.allow("1.2.3.4"));
        }
        assert!(!limiter.allow("1.2.3.4"));
    }

    #[test]
    fn rate_limiter_tracks_ips_independently() {
        let limiter = ActivationRateLimiter::new();
        for _ in 0..10 {
            limiter.allow("1.1.1.1");
        }
        assert!(limiter.allow("2.2.2.2"));
    }
}
