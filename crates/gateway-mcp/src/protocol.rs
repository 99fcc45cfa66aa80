//! Client/server wire protocol (§6). Bidirectional JSON message stream over a
//! WebSocket upgrade from HTTP. Tagged enums keep the message namespace
//! exhaustive at the type level, the same shape the donor uses for its MCP
//! `tools/call` request/response pair.

use gateway_core::Plan;
use serde::{Deserialize, Serialize};

/// Messages a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "register")]
    Register { session_id: String },

    #[serde(rename = "user-message")]
    UserMessage { session_id: String, content: String },

    #[serde(rename = "execute_panel")]
    ExecutePanel { session_id: String, panel: PanelRequest },

    #[serde(rename = "tools/call")]
    ToolsCall {
        session_id: String,
        name: String,
        arguments: serde_json::Value,
        token: String,
        nonce: String,
    },
}

/// The structured request body of an `execute_panel` message; a
/// client-facing, partially-optional mirror of [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelRequest {
    pub source: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub measures: Vec<gateway_core::Measure>,
    #[serde(default)]
    pub filters: Vec<gateway_core::Filter>,
    pub top_n: Option<i64>,
    pub grain: Option<gateway_core::Grain>,
    #[serde(default)]
    pub order_by: Vec<gateway_core::OrderBy>,
}

impl From<PanelRequest> for Plan {
    fn from(p: PanelRequest) -> Self {
        Plan {
            source: p.source,
            dimensions: p.dimensions,
            measures: p.measures,
            filters: p.filters,
            grain: p.grain,
            top_n: p.top_n,
            order_by: p.order_by,
        }
    }
}

/// Messages the server may send back, always JSON with a `type` tag (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "assistant-message")]
    AssistantMessage { content: String },

    #[serde(rename = "sql-result")]
    SqlResult {
        template: String,
        rows: Vec<serde_json::Value>,
        count: usize,
        metadata: SqlResultMetadata,
    },

    #[serde(rename = "dashboard.progress")]
    DashboardProgress {
        step: String,
        message: String,
        pct: f32,
        elapsed_ms: u64,
        completed_steps: u32,
        total_steps: u32,
    },

    #[serde(rename = "dashboard.complete")]
    DashboardComplete {
        success: bool,
        url: Option<String>,
        spec_id: String,
        elapsed_ms: u64,
        objects_created: u32,
        panels_count: u32,
    },

    #[serde(rename = "info")]
    Info { content: String },

    #[serde(rename = "error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_class: Option<String>,
    },
}

impl ServerMessage {
    pub fn from_gateway_error(err: &gateway_core::GatewayError) -> Self {
        ServerMessage::Error {
            content: None,
            error: Some(err.error_token()),
            error_class: Some(err.classify().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlResultMetadata {
    pub query_id: String,
    pub execution_time_ms: u64,
    pub bytes_scanned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_call_round_trips_through_json() {
        let msg = ClientMessage::ToolsCall {
            session_id: "s1".into(),
            name: "sample_top".into(),
            arguments: serde_json::json!({"n": 5}),
            token: "tk_abc".into(),
            nonce: "abc123".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientMessage::ToolsCall { name, nonce, .. } => {
                assert_eq!(name, "sample_top");
                assert_eq!(nonce, "abc123");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_from_gateway_error_carries_class_and_token() {
        let err = gateway_core::GatewayError::ReplayDetected;
        let msg = ServerMessage::from_gateway_error(&err);
        match msg {
            ServerMessage::Error { error, error_class, .. } => {
                assert_eq!(error.as_deref(), Some("replay_detected"));
                assert_eq!(error_class.as_deref(), Some("auth"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
