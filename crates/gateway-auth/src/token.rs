//! # Token & Identity Service (C3)
//!
//! Opaque bearer tokens are the only credential the gateway accepts.
//! Nothing about a token's privileges is ever encoded in the token itself —
//! the token is a random capability handle; its meaning lives entirely in
//! the `system.permission.granted` event projected for its hash (§4.3).

use crate::nonce::NonceLedger;
use crate::role_template::RoleTemplate;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gateway_core::envelope::PermissionEnvelope;
use gateway_core::events::EventKind;
use gateway_core::{GatewayError, GatewayResult};
use gateway_warehouse::reader::ConsistencyReader;
use gateway_warehouse::EventLogger;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const TOKEN_PREFIX: &str = "tk_";
pub const MIN_TOKEN_LEN: usize = 40;
const RANDOM_BODY_LEN: usize = 40; // total length = 3 (prefix) + 40 = 43 >= MIN_TOKEN_LEN

/// A freshly issued token, returned exactly once — the raw value is never
/// persisted (§6 Token format).
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_hash: String,
    pub prefix: String,
    pub suffix: String,
}

pub struct TokenIdentityService {
    logger: EventLogger,
    reader: Arc<ConsistencyReader>,
    pepper: String,
    nonce_ledger: NonceLedger,
}

impl TokenIdentityService {
    pub fn new(logger: EventLogger, reader: Arc<ConsistencyReader>, pepper: String) -> Self {
        Self {
            logger,
            reader,
            pepper,
            nonce_ledger: NonceLedger::new(Duration::from_secs(600)),
        }
    }

    fn hash_token(&self, token: &str) -> String {
        hash_token_with_pepper(token, &self.pepper)
    }

    fn generate_raw_token() -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        let body: String = (0..RANDOM_BODY_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        format!("{TOKEN_PREFIX}{body}")
    }

    /// `issue(user, role_template, ttl) → token` (§4.3). Emits
    /// `system.user.created` the first time this username is seen, then
    /// always `system.permission.granted`.
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        username: &str,
        role_template: RoleTemplate,
        ttl: ChronoDuration,
    ) -> GatewayResult<IssuedToken> {
        let existing_user = self
            .reader
            .read_object("user", &format!("user/{username}"))
            .await?;
        if existing_user.is_empty() {
            self.logger
                .log(EventKind::UserCreated {
                    username: username.to_string(),
                    email: String::new(),
                    role_template: role_template.name().to_string(),
                })
                .await?;
        }

        let token = Self::generate_raw_token();
        let token_hash = self.hash_token(&token);
        let prefix = token[..8].to_string();
        let suffix = token[token.len() - 8..].to_string();
        let expires_at = Utc::now() + ttl;

        self.logger
            .log(EventKind::PermissionGranted {
                token_hash: token_hash.clone(),
                token_prefix: prefix.clone(),
                token_suffix: suffix.clone(),
                username: username.to_string(),
                allowed_tools: role_template.allowed_tools(),
                max_rows: role_template.max_rows(),
                daily_runtime_seconds: role_template.daily_runtime_seconds(),
                expires_at,
            })
            .await?;

        // Projected alongside `user/<username>` so `permission_envelope` can
        // resolve this user's current token hash without a free-form
        // secondary index.
        self.logger
            .log(EventKind::UserTokenIssued { username: username.to_string(), token_hash: token_hash.clone() })
            .await?;

        info!(username, prefix = %prefix, "issued token");
        Ok(IssuedToken { token, token_hash, prefix, suffix })
    }

    /// `validate(token, nonce) → envelope | error` (§4.3). Checks emergency
    /// revocation first, then the per-token grant/revoke history, then
    /// expiry, then replay.
    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &str, nonce: &str) -> GatewayResult<PermissionEnvelope> {
        if !token.starts_with(TOKEN_PREFIX) || token.len() < MIN_TOKEN_LEN {
            return Err(GatewayError::InvalidToken);
        }

        let token_hash = self.hash_token(token);
        let envelope = self.resolve_envelope_by_hash(&token_hash).await?;

        if !self.nonce_ledger.check_and_record(&token_hash, nonce) {
            return Err(GatewayError::ReplayDetected);
        }

        Ok(envelope)
    }

    /// Whether an `system.permissions.all_revoked` emergency event is in
    /// effect; an unconditional deny regardless of any individual grant
    /// (§4.3).
    async fn emergency_revoked(&self) -> GatewayResult<bool> {
        let emergency = self.reader.read_object("user_token", "user_token/*").await?;
        Ok(emergency
            .iter()
            .any(|row| row.event.action == "system.permissions.all_revoked"))
    }

    /// Resolves the current effective envelope for a token hash: latest
    /// non-revoked `system.permission.granted` event, checked against
    /// emergency revocation and expiry. Shared by `validate` (which adds a
    /// nonce check on top) and `permission_envelope` (which has none).
    async fn resolve_envelope_by_hash(&self, token_hash: &str) -> GatewayResult<PermissionEnvelope> {
        if self.emergency_revoked().await? {
            warn!("validation denied: emergency revocation in effect");
            return Err(GatewayError::Revoked);
        }

        let history = self
            .reader
            .read_object("user_token", &format!("user_token/{token_hash}"))
            .await?;

        let Some(grant) = history
            .iter()
            .filter(|row| row.event.action == "system.permission.granted")
            .max_by_key(|row| row.event.occurred_at)
        else {
            return Err(GatewayError::InvalidToken);
        };

        let revoked = history
            .iter()
            .any(|row| row.event.action == "system.permission.revoked" && row.event.occurred_at >= grant.event.occurred_at);
        if revoked {
            return Err(GatewayError::Revoked);
        }

        let envelope = envelope_from_grant(&grant.event.attributes)?;
        if envelope.is_expired(Utc::now()) {
            return Err(GatewayError::Expired);
        }

        Ok(envelope)
    }

    /// `revoke(user_or_token, reason)` (§4.3). `token_hash` identifies a
    /// single token; pass `None` to revoke all of a user's tokens (not
    /// separately tracked — callers revoke per hash they know about).
    #[instrument(skip(self))]
    pub async fn revoke(&self, token_hash: &str, reason: &str) -> GatewayResult<()> {
        self.logger
            .log(EventKind::PermissionRevoked {
                token_hash: token_hash.to_string(),
                reason: reason.to_string(),
            })
            .await
    }

    /// Emergency revocation: shadows every grant until lifted (§4.3).
    #[instrument(skip(self))]
    pub async fn revoke_all(&self, reason: &str) -> GatewayResult<()> {
        self.logger
            .log(EventKind::AllPermissionsRevoked { reason: reason.to_string() })
            .await
    }

    /// `permission_envelope(username)`: derived view of the effective
    /// envelope for a username's most recently issued, non-revoked token.
    /// Resolves the username → token_hash pointer projected by `issue`
    /// (`UserTokenIssued`, carried under the same `user/<username>` object
    /// id as `UserCreated`/`UserUpdated`), then reuses the same
    /// grant-resolution path `validate` uses.
    #[instrument(skip(self))]
    pub async fn permission_envelope(&self, username: &str) -> GatewayResult<PermissionEnvelope> {
        let rows = self.reader.read_object("user", &format!("user/{username}")).await?;
        let Some(pointer) = rows
            .iter()
            .filter(|row| row.event.action == "system.user.token_issued")
            .max_by_key(|row| row.event.occurred_at)
        else {
            return Err(GatewayError::InvalidToken);
        };

        let token_hash = pointer
            .event
            .attributes
            .get("token_hash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::BadSchemaContract { message: "token_issued pointer missing token_hash".into() })?;

        self.resolve_envelope_by_hash(token_hash).await
    }
}

/// Pure `sha256(token || pepper)` hex digest (§6). Exposed so callers that
/// need to key per-token in-process state (e.g. quota trackers) without a
/// second round trip through [`TokenIdentityService`] can derive the same
/// hash the service stores.
pub fn hash_token_with_pepper(token: &str, pepper: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(pepper.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn envelope_from_grant(attributes: &serde_json::Value) -> GatewayResult<PermissionEnvelope> {
    serde_json::from_value::<GrantAttributes>(attributes.clone())
        .map(|g| PermissionEnvelope {
            username: g.username,
            allowed_tools: g.allowed_tools.into_iter().collect(),
            max_rows: g.max_rows,
            daily_runtime_seconds: g.daily_runtime_seconds,
            expires_at: g.expires_at,
        })
        .map_err(|e| GatewayError::BadSchemaContract { message: e.to_string() })
}

#[derive(serde::Deserialize)]
struct GrantAttributes {
    username: String,
    allowed_tools: Vec<String>,
    max_rows: i64,
    daily_runtime_seconds: i64,
    expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_matches_bit_exact_format() {
        let token = TokenIdentityService::generate_raw_token();
        assert!(token.starts_with(TOKEN_PREFIX));
        assert!(token.len() >= MIN_TOKEN_LEN);
        assert!(token[3..].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn hash_is_stable_for_the_same_token_and_pepper() {
        let a = hash_token_with_pepper("tk_abc", "pepper");
        let b = hash_token_with_pepper("tk_abc", "pepper");
        assert_eq!(a, b);
        assert_ne!(a, hash_token_with_pepper("tk_abc", "other_pepper"));
    }
}
