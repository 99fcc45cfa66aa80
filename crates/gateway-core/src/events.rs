//! # The Two-Object-Store Law
//!
//! The system stores exactly two physical collections of rows (§3):
//!
//! - [`RawEnvelope`] — the append-only ingestion lane: `{payload, source_lane,
//!   received_at}`, opaque at the physical layer.
//! - [`ProcessedEvent`] — the typed projection of the ingestion lane:
//!   `{event_id, occurred_at, action, actor_id, source, object_type,
//!   object_id, attributes}`.
//!
//! Every other logical entity (permissions, tokens, dashboards, schedules,
//! deployments, leases...) is represented as `ProcessedEvent`s, never as its
//! own physical collection. [`EventKind`] is the tagged-variant model (per
//! the donor's re-architecture note on dynamic event typing) used at the
//! edges before an event is flattened into a `RawEnvelope` for ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata enriched server-side inside the logging procedure (§4.2):
/// `_gateway_meta = {logged_at, query_tag, warehouse, ip, user, role, session}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventMetadata {
    pub correlation_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub query_tag: Option<String>,
    pub warehouse: Option<String>,
    pub ip: Option<String>,
    pub role: Option<String>,
    pub tags: HashMap<String, String>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_query_tag(mut self, query_tag: impl Into<String>) -> Self {
        self.query_tag = Some(query_tag.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// The raw, append-only ingestion-lane row. Nothing but the event logger (C2)
/// writes these; nothing reads them except the consistency reader (C9)
/// within the fresh window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub payload: serde_json::Value,
    pub source_lane: String,
    pub received_at: DateTime<Utc>,
}

/// The typed projection of the ingestion lane. Every field here is derived
/// — the processed lane is a pure function of the ingestion lane and can
/// always be rebuilt by replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub action: String,
    pub actor_id: Option<String>,
    pub source: String,
    pub object_type: String,
    pub object_id: String,
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl ProcessedEvent {
    /// Whether this event's object_type/object_id pair matches `(object_type, object_id)`.
    pub fn identifies(&self, object_type: &str, object_id: &str) -> bool {
        self.object_type == object_type && self.object_id == object_id
    }
}

/// Project "latest event per entity id, newest wins" over a processed-lane
/// slice. Superseding actions (passed in `shadow_actions`) remove the entity
/// from the result entirely, modeling revocation/deletion events that shadow
/// a prior grant rather than rewriting it.
pub fn project_latest<'a>(
    events: &'a [ProcessedEvent],
    shadow_actions: &[&str],
) -> HashMap<(String, String), &'a ProcessedEvent> {
    let mut latest: HashMap<(String, String), &ProcessedEvent> = HashMap::new();
    let mut shadowed: HashMap<(String, String), DateTime<Utc>> = HashMap::new();

    for event in events {
        let key = (event.object_type.clone(), event.object_id.clone());
        if shadow_actions.contains(&event.action.as_str()) {
            shadowed
                .entry(key.clone())
                .and_modify(|t| {
                    if event.occurred_at > *t {
                        *t = event.occurred_at;
                    }
                })
                .or_insert(event.occurred_at);
            continue;
        }
        latest
            .entry(key)
            .and_modify(|existing| {
                if event.occurred_at > existing.occurred_at {
                    *existing = event;
                }
            })
            .or_insert(event);
    }

    latest
        .into_iter()
        .filter(|(key, event)| {
            shadowed
                .get(key)
                .map(|shadow_ts| *shadow_ts <= event.occurred_at)
                .unwrap_or(true)
        })
        .collect()
}

/// The closed set of event actions the gateway emits. Holding the payload as
/// an enum at the edges (rather than a raw string + loose JSON) keeps the
/// action namespace exhaustive and lets the compiler catch typos in call
/// sites; [`EventKind::action`] / [`EventKind::object_type`] /
/// [`EventKind::attributes`] flatten a variant into a [`ProcessedEvent`]'s
/// shape before it is wrapped in a [`RawEnvelope`] for the logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "attributes")]
pub enum EventKind {
    #[serde(rename = "system.user.created")]
    UserCreated { username: String, email: String, role_template: String },
    #[serde(rename = "system.user.updated")]
    UserUpdated { username: String, changes: serde_json::Value },
    #[serde(rename = "system.permission.granted")]
    PermissionGranted {
        token_hash: String,
        token_prefix: String,
        token_suffix: String,
        username: String,
        allowed_tools: Vec<String>,
        max_rows: i64,
        daily_runtime_seconds: i64,
        expires_at: DateTime<Utc>,
    },
    #[serde(rename = "system.permission.revoked")]
    PermissionRevoked { token_hash: String, reason: String },
    #[serde(rename = "system.permissions.all_revoked")]
    AllPermissionsRevoked { reason: String },
    #[serde(rename = "system.token.created")]
    TokenCreated { username: String, token_prefix: String, token_suffix: String },
    #[serde(rename = "system.token.revoked")]
    TokenRevoked { token_hash: String, reason: String },
    /// A username → token_hash pointer, projected alongside `UserCreated`
    /// under the same `user/<username>` object id so `permission_envelope`
    /// can resolve "the currently issued token for this user" without a
    /// free-form secondary index (§4.3).
    #[serde(rename = "system.user.token_issued")]
    UserTokenIssued { username: String, token_hash: String },
    #[serde(rename = "system.activation.created")]
    ActivationCreated {
        code: String,
        username: String,
        token_template: String,
        activation_expires_at: DateTime<Utc>,
    },
    #[serde(rename = "system.activation.used")]
    ActivationUsed { code: String, username: String },

    #[serde(rename = "mcp.query.routed")]
    QueryRouted {
        tier: u8,
        template: Option<String>,
        expected_ms: u64,
        actual_ms: u64,
        expected_cost: f64,
        actual_cost: f64,
        success: bool,
        confidence: f64,
        reasoning: String,
    },
    #[serde(rename = "mcp.request.processed")]
    RequestProcessed {
        request_id: Uuid,
        tier: u8,
        tool: String,
        args_redacted: serde_json::Value,
        execution_time_ms: u64,
        success: bool,
        cost_estimate: f64,
    },
    #[serde(rename = "mcp.request.cancelled")]
    RequestCancelled { request_id: Uuid, reason: String },
    #[serde(rename = "mcp.error")]
    McpError {
        request_id: Option<Uuid>,
        error_class: String,
        error: String,
        details: Option<serde_json::Value>,
    },
    #[serde(rename = "mcp.tool.streaming")]
    ToolStreaming { request_id: Uuid, chunk_index: u32, done: bool },

    #[serde(rename = "dashboard.spec.created")]
    DashboardSpecCreated { spec_id: String, name: String, spec: serde_json::Value },
    #[serde(rename = "dashboard.schedule.created")]
    ScheduleCreated { schedule_id: String, spec_id: String, cron: String, task_name: String },
    #[serde(rename = "dashboard.schedule.updated")]
    ScheduleUpdated { schedule_id: String, changes: serde_json::Value },
    #[serde(rename = "dashboard.schedule.deleted")]
    ScheduleDeleted { schedule_id: String },
    #[serde(rename = "dashboard.schedule.executed")]
    ScheduleExecuted { schedule_id: String, success: bool, duration_ms: u64 },
    #[serde(rename = "dashboard.progress")]
    DashboardProgress {
        spec_id: String,
        step: String,
        pct: f32,
        elapsed_ms: u64,
        completed_steps: u32,
        total_steps: u32,
    },
    #[serde(rename = "dashboard.complete")]
    DashboardComplete {
        spec_id: String,
        success: bool,
        url: Option<String>,
        elapsed_ms: u64,
        objects_created: u32,
        panels_count: u32,
    },

    #[serde(rename = "ddl.object.deployed")]
    DdlObjectDeployed {
        object_type: String,
        object_name: String,
        version: DateTime<Utc>,
        previous_version: Option<String>,
        provenance: String,
        reason: String,
        lease_id: Option<String>,
        ddl_length: usize,
    },
    #[serde(rename = "ddl.deploy.error")]
    DdlDeployError {
        object_name: String,
        error_class: String,
        error: String,
    },
    #[serde(rename = "ddl.stage.deployed")]
    DdlStageDeployed { object_name: String, stage_url: String, md5: String },

    #[serde(rename = "dev.claim")]
    DevClaim {
        lease_id: String,
        app_name: String,
        namespace: String,
        agent_id: String,
        ttl_seconds: u64,
    },
    #[serde(rename = "dev.release")]
    DevRelease { lease_id: String },
    #[serde(rename = "dev.token.consume")]
    RateLimitTokenConsume { actor: String, tokens: u32 },
    #[serde(rename = "dev.token.refill")]
    RateLimitTokenRefill { actor: String, tokens: u32 },

    #[serde(rename = "session.started")]
    SessionStarted { session_id: String },
    #[serde(rename = "session.ended")]
    SessionEnded { session_id: String, duration_ms: u64 },
}

impl EventKind {
    pub fn action(&self) -> &'static str {
        use EventKind::*;
        match self {
            UserCreated { .. } => "system.user.created",
            UserUpdated { .. } => "system.user.updated",
            PermissionGranted { .. } => "system.permission.granted",
            PermissionRevoked { .. } => "system.permission.revoked",
            AllPermissionsRevoked { .. } => "system.permissions.all_revoked",
            TokenCreated { .. } => "system.token.created",
            TokenRevoked { .. } => "system.token.revoked",
            UserTokenIssued { .. } => "system.user.token_issued",
            ActivationCreated { .. } => "system.activation.created",
            ActivationUsed { .. } => "system.activation.used",
            QueryRouted { .. } => "mcp.query.routed",
            RequestProcessed { .. } => "mcp.request.processed",
            RequestCancelled { .. } => "mcp.request.cancelled",
            McpError { .. } => "mcp.error",
            ToolStreaming { .. } => "mcp.tool.streaming",
            DashboardSpecCreated { .. } => "dashboard.spec.created",
            ScheduleCreated { .. } => "dashboard.schedule.created",
            ScheduleUpdated { .. } => "dashboard.schedule.updated",
            ScheduleDeleted { .. } => "dashboard.schedule.deleted",
            ScheduleExecuted { .. } => "dashboard.schedule.executed",
            DashboardProgress { .. } => "dashboard.progress",
            DashboardComplete { .. } => "dashboard.complete",
            DdlObjectDeployed { .. } => "ddl.object.deployed",
            DdlDeployError { .. } => "ddl.deploy.error",
            DdlStageDeployed { .. } => "ddl.stage.deployed",
            DevClaim { .. } => "dev.claim",
            DevRelease { .. } => "dev.release",
            RateLimitTokenConsume { .. } => "dev.token.consume",
            RateLimitTokenRefill { .. } => "dev.token.refill",
            SessionStarted { .. } => "session.started",
            SessionEnded { .. } => "session.ended",
        }
    }

    /// The `(object_type, object_id)` pair this event projects onto, per the
    /// entity table in §3. Events with no durable entity (progress/streaming
    /// notifications) use a synthetic object_type of `"ephemeral"`.
    pub fn object(&self) -> (&'static str, String) {
        use EventKind::*;
        match self {
            UserCreated { username, .. } | UserUpdated { username, .. } => {
                ("user", format!("user/{username}"))
            }
            UserTokenIssued { username, .. } => ("user", format!("user/{username}")),
            PermissionGranted { token_hash, .. } | PermissionRevoked { token_hash, .. } => {
                ("user_token", format!("user_token/{token_hash}"))
            }
            AllPermissionsRevoked { .. } => ("user_token", "user_token/*".to_string()),
            TokenCreated { token_prefix, token_suffix, .. } => (
                "user_token",
                format!("user_token/{token_prefix}...{token_suffix}"),
            ),
            TokenRevoked { token_hash, .. } => ("user_token", format!("user_token/{token_hash}")),
            ActivationCreated { code, .. } | ActivationUsed { code, .. } => {
                ("activation", format!("activation/{code}"))
            }
            QueryRouted { .. } => ("ephemeral", "routing_decision".to_string()),
            RequestProcessed { request_id, .. } => ("request", format!("request/{request_id}")),
            RequestCancelled { request_id, .. } => ("request", format!("request/{request_id}")),
            McpError { request_id, .. } => (
                "request",
                request_id
                    .map(|id| format!("request/{id}"))
                    .unwrap_or_else(|| "request/unknown".to_string()),
            ),
            ToolStreaming { request_id, .. } => ("request", format!("request/{request_id}")),
            DashboardSpecCreated { spec_id, .. } => {
                ("dashboard_spec", format!("dashboard_spec/{spec_id}"))
            }
            ScheduleCreated { schedule_id, .. }
            | ScheduleUpdated { schedule_id, .. }
            | ScheduleDeleted { schedule_id }
            | ScheduleExecuted { schedule_id, .. } => {
                ("schedule", format!("schedule/{schedule_id}"))
            }
            DashboardProgress { spec_id, .. } | DashboardComplete { spec_id, .. } => {
                ("dashboard_spec", format!("dashboard_spec/{spec_id}"))
            }
            DdlObjectDeployed { object_name, .. } | DdlDeployError { object_name, .. } => {
                ("ddl_object", format!("ddl_object/{object_name}"))
            }
            DdlStageDeployed { object_name, .. } => {
                ("ddl_object", format!("ddl_object/{object_name}"))
            }
            DevClaim { lease_id, .. } | DevRelease { lease_id } => {
                ("lease", format!("lease/{lease_id}"))
            }
            RateLimitTokenConsume { actor, .. } | RateLimitTokenRefill { actor, .. } => {
                ("rate_bucket", format!("rate_bucket/{actor}"))
            }
            SessionStarted { session_id } | SessionEnded { session_id, .. } => {
                ("session", format!("session/{session_id}"))
            }
        }
    }

    pub fn attributes(&self) -> serde_json::Value {
        serde_json::to_value(self).ok().and_then(|v| v.get("attributes").cloned()).unwrap_or(serde_json::Value::Null)
    }

    /// Flatten into a processed-lane row, ready for insertion by the logger.
    pub fn into_processed_event(self, actor_id: Option<String>, source: String, metadata: EventMetadata) -> ProcessedEvent {
        let action = self.action().to_string();
        let (object_type, object_id) = self.object();
        let attributes = self.attributes();
        ProcessedEvent {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            action,
            actor_id,
            source,
            object_type: object_type.to_string(),
            object_id,
            attributes,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revocation_shadows_grant() {
        let granted = ProcessedEvent {
            event_id: Uuid::new_v4(),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            action: "system.permission.granted".into(),
            actor_id: None,
            source: "test".into(),
            object_type: "user_token".into(),
            object_id: "user_token/abc".into(),
            attributes: serde_json::json!({}),
            metadata: EventMetadata::default(),
        };
        let revoked = ProcessedEvent {
            event_id: Uuid::new_v4(),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
            action: "system.permission.revoked".into(),
            actor_id: None,
            source: "test".into(),
            object_type: "user_token".into(),
            object_id: "user_token/abc".into(),
            attributes: serde_json::json!({}),
            metadata: EventMetadata::default(),
        };
        let events = vec![granted, revoked];
        let projected = project_latest(&events, &["system.permission.revoked"]);
        assert!(projected.is_empty(), "revocation must shadow the grant");
    }

    #[test]
    fn latest_event_wins_when_not_shadowed() {
        let v1 = ProcessedEvent {
            event_id: Uuid::new_v4(),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            action: "system.user.created".into(),
            actor_id: None,
            source: "test".into(),
            object_type: "user".into(),
            object_id: "user/alice".into(),
            attributes: serde_json::json!({"v": 1}),
            metadata: EventMetadata::default(),
        };
        let v2 = ProcessedEvent {
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
            attributes: serde_json::json!({"v": 2}),
            ..v1.clone()
        };
        let events = vec![v1, v2];
        let projected = project_latest(&events, &[]);
        let current = projected.get(&("user".to_string(), "user/alice".to_string())).unwrap();
        assert_eq!(current.attributes["v"], 2);
    }

    use chrono::TimeZone;
}
