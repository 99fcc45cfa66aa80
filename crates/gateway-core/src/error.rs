//! # Error Taxonomy
//!
//! Every failure in the gateway is a variant of [`GatewayError`]. The
//! taxonomy mirrors the error classes the system is required to carry end
//! to end: each failure produces both a structured `{ok:false, error_class,
//! error}` response and a corresponding `mcp.error.<class>` / `ddl.deploy.error`
//! event (see `gateway-core::events`). [`GatewayError::classify`] is the single
//! place that maps a variant to its wire-level `error_class` string so callers
//! never hand-roll the mapping.
//!
//! ## Error Categories
//!
//! - **config** — missing env var, bad schema contract.
//! - **auth** — invalid/expired/revoked tokens, replay detection.
//! - **authz** — role or tool not permitted for the caller.
//! - **quota** — row/runtime/rate limits exceeded.
//! - **validation** — plan rejected by the schema contract.
//! - **execution** — warehouse-side failures surfaced by the executor.
//! - **deploy** — DDL gateway failures.
//! - **transport** — connection-level failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout the gateway.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// The complete error taxonomy for the gateway (see §7 of the spec).
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum GatewayError {
    // ---- config ----
    /// A required environment variable was not set.
    #[error("missing configuration: {name}")]
    MissingEnvVar { name: String },

    /// The schema contract file failed to parse or is internally inconsistent.
    #[error("invalid schema contract: {message}")]
    BadSchemaContract { message: String },

    // ---- auth ----
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid token")]
    InvalidToken,

    #[error("replay detected")]
    ReplayDetected,

    #[error("token expired")]
    Expired,

    #[error("token revoked")]
    Revoked,

    // ---- authz ----
    #[error("forbidden: caller role lacks required capability")]
    Forbidden,

    #[error("tool not allowed for this token: {tool}")]
    ToolNotAllowed { tool: String },

    // ---- quota ----
    #[error("row limit exceeded: requested {requested}, cap {cap}")]
    RowLimitExceeded { requested: i64, cap: i64 },

    #[error("daily runtime budget exceeded: used {used_seconds}s of {cap_seconds}s")]
    RuntimeExceeded { used_seconds: i64, cap_seconds: i64 },

    #[error("rate limited")]
    RateLimited,

    // ---- validation ----
    #[error("unknown source: {source}")]
    UnknownSource { source: String },

    #[error("invalid column: {source}.{column}")]
    InvalidColumn { source: String, column: String },

    #[error("invalid operator: {operator}")]
    InvalidOperator { operator: String },

    #[error("invalid aggregation: {function}")]
    InvalidAggregation { function: String },

    #[error("invalid grain: {grain}")]
    InvalidGrain { grain: String },

    #[error("row limit exceeds policy: requested {requested}, policy max {policy_max}")]
    RowLimitExceedsPolicy { requested: i64, policy_max: i64 },

    #[error("value out of range: {field}")]
    InvalidRange { field: String },

    // ---- execution ----
    #[error("syntax error: {message}")]
    Syntax { message: String },

    #[error("missing dependency: {object}")]
    Dependency { object: String },

    #[error("insufficient privilege: {message}")]
    Privilege { message: String },

    #[error("statement timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("execution error: {message}")]
    Other { message: String },

    // ---- deploy ----
    #[error("version conflict: current {current}, expected {expected}")]
    VersionConflict { current: String, expected: String },

    #[error("shadow compile failed: {message}")]
    CompileFailed { message: String },

    #[error("forbidden DDL operation: {statement_kind}")]
    ForbiddenOperation { statement_kind: String },

    #[error("checksum mismatch: expected {expected_md5}, actual {actual_md5}")]
    ChecksumMismatch {
        expected_md5: String,
        actual_md5: String,
    },

    #[error("stage file too large: {size_bytes} bytes (cap {cap_bytes})")]
    FileTooLarge { size_bytes: u64, cap_bytes: u64 },

    #[error("stage file not found: {stage_url}")]
    FileNotFound { stage_url: String },

    #[error("expected exactly one DDL statement, found {count}")]
    MultipleStatements { count: usize },

    #[error("namespace lease invalid or expired: {lease_id}")]
    InvalidLease { lease_id: String },

    // ---- transport ----
    #[error("client disconnected")]
    Disconnected,

    #[error("request cancelled")]
    Cancelled,

    /// Wraps a lower-level transient failure (network, warehouse resume, 5xx)
    /// that the caller should retry with backoff.
    #[error("transient error: {message}")]
    Transient { message: String },
}

impl GatewayError {
    /// The wire-level `error_class` reported in `{ok:false, error_class, ...}`
    /// responses and in `mcp.error.<class>` / `ddl.deploy.error` events.
    pub fn classify(&self) -> &'static str {
        use GatewayError::*;
        match self {
            MissingEnvVar { .. } | BadSchemaContract { .. } => "config",
            Unauthenticated | InvalidToken | ReplayDetected | Expired | Revoked => "auth",
            Forbidden | ToolNotAllowed { .. } => "authz",
            RowLimitExceeded { .. } | RuntimeExceeded { .. } | RateLimited => "quota",
            UnknownSource { .. }
            | InvalidColumn { .. }
            | InvalidOperator { .. }
            | InvalidAggregation { .. }
            | InvalidGrain { .. }
            | RowLimitExceedsPolicy { .. }
            | InvalidRange { .. } => "validation",
            Syntax { .. } | Dependency { .. } | Privilege { .. } | Timeout { .. } | Other { .. } => {
                "execution"
            }
            VersionConflict { .. }
            | CompileFailed { .. }
            | ForbiddenOperation { .. }
            | ChecksumMismatch { .. }
            | FileTooLarge { .. }
            | FileNotFound { .. }
            | MultipleStatements { .. }
            | InvalidLease { .. } => "deploy",
            Disconnected | Cancelled | Transient { .. } => "transport",
        }
    }

    /// A short machine-readable error token, e.g. `"replay_detected"`, used as
    /// the `error` field alongside `error_class`.
    pub fn error_token(&self) -> String {
        use GatewayError::*;
        match self {
            MissingEnvVar { .. } => "missing_env_var".into(),
            BadSchemaContract { .. } => "bad_schema_contract".into(),
            Unauthenticated => "unauth".into(),
            InvalidToken => "invalid_token".into(),
            ReplayDetected => "replay_detected".into(),
            Expired => "expired".into(),
            Revoked => "revoked".into(),
            Forbidden => "forbidden".into(),
            ToolNotAllowed { .. } => "tool_not_allowed".into(),
            RowLimitExceeded { .. } => "row_limit_exceeded".into(),
            RuntimeExceeded { .. } => "runtime_exceeded".into(),
            RateLimited => "rate_limited".into(),
            UnknownSource { .. } => "unknown_source".into(),
            InvalidColumn { .. } => "invalid_column".into(),
            InvalidOperator { .. } => "invalid_operator".into(),
            InvalidAggregation { .. } => "invalid_aggregation".into(),
            InvalidGrain { .. } => "invalid_grain".into(),
            RowLimitExceedsPolicy { .. } => "row_limit_exceeds_policy".into(),
            InvalidRange { .. } => "invalid_range".into(),
            Syntax { .. } => "syntax".into(),
            Dependency { .. } => "dependency".into(),
            Privilege { .. } => "privilege".into(),
            Timeout { .. } => "timeout".into(),
            Other { .. } => "other".into(),
            VersionConflict { .. } => "version_conflict".into(),
            CompileFailed { .. } => "compile_failed".into(),
            ForbiddenOperation { .. } => "forbidden_operation".into(),
            ChecksumMismatch { .. } => "checksum_mismatch".into(),
            FileTooLarge { .. } => "file_too_large".into(),
            FileNotFound { .. } => "file_not_found".into(),
            MultipleStatements { .. } => "multiple_statements".into(),
            InvalidLease { .. } => "invalid_lease".into(),
            Disconnected => "disconnected".into(),
            Cancelled => "cancelled".into(),
            Transient { .. } => "transient".into(),
        }
    }

    /// Whether the caller should retry this error with backoff (§5, §7:
    /// `timeout`, `transport`, and upstream `5xx` are retryable).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout { .. } | GatewayError::Transient { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_spec_taxonomy() {
        assert_eq!(GatewayError::ReplayDetected.classify(), "auth");
        assert_eq!(
            GatewayError::VersionConflict {
                current: "a".into(),
                expected: "b".into()
            }
            .classify(),
            "deploy"
        );
        assert_eq!(
            GatewayError::InvalidGrain {
                grain: "FORTNIGHT".into()
            }
            .classify(),
            "validation"
        );
    }

    #[test]
    fn only_timeout_and_transient_are_retryable() {
        assert!(GatewayError::Timeout { seconds: 60 }.is_retryable());
        assert!(GatewayError::Transient {
            message: "connection reset".into()
        }
        .is_retryable());
        assert!(!GatewayError::Forbidden.is_retryable());
        assert!(!GatewayError::RateLimited.is_retryable());
    }

    #[test]
    fn error_token_is_stable_for_replay() {
        assert_eq!(GatewayError::ReplayDetected.error_token(), "replay_detected");
    }
}
