//! # Plan Executor (C6)
//!
//! The only path through which a user plan reaches the warehouse. Lives
//! behind the single `execute_query_plan` procedure (§4.6): re-validates
//! defensively, clamps `top_n` to the caller's envelope, sets the query tag,
//! and executes.

use gateway_core::envelope::PermissionEnvelope;
use gateway_core::events::EventKind;
use gateway_core::plan::Plan;
use gateway_core::schema_contract::SchemaContract;
use gateway_core::{GatewayError, GatewayResult};
use gateway_mcp::Procedure;
use gateway_warehouse::{EventLogger, WarehouseSession};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::compiler::compile;

/// `{ok:true, query_id, row_count, sample_rows, bytes_scanned}` (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ok: bool,
    pub query_id: String,
    pub row_count: u64,
    pub sample_rows: Vec<serde_json::Value>,
    pub bytes_scanned: u64,
}

pub struct PlanExecutor {
    session: Arc<WarehouseSession>,
    logger: EventLogger,
    contract: Arc<SchemaContract>,
}

impl PlanExecutor {
    pub fn new(session: Arc<WarehouseSession>, logger: EventLogger, contract: Arc<SchemaContract>) -> Self {
        Self { session, logger, contract }
    }

    /// Executes `plan` under `envelope`'s identity. Clamps `top_n` to
    /// `min(plan.top_n, envelope.max_rows)` regardless of what the compiler
    /// already applied, sets the query tag to
    /// `{mcp_procedure, mcp_user, mcp_timestamp}`, and logs `mcp.error.*` on
    /// failure (§4.6).
    #[instrument(skip(self, plan, envelope), fields(user = %envelope.username))]
    pub async fn execute(&self, request_id: Uuid, mut plan: Plan, envelope: &PermissionEnvelope) -> GatewayResult<ExecutionResult> {
        let requested = plan.top_n.unwrap_or(gateway_core::SYSTEM_MAX_ROWS);
        plan.top_n = Some(envelope.clamp_rows(requested));

        let compiled = compile(&plan, &self.contract)?;
        plan = compiled.plan;

        self.session.set_query_tag("execute_query_plan", None);

        let result = self
            .session
            .call_procedure(
                Procedure::ExecuteQueryPlan,
                vec![serde_json::json!({
                    "plan": plan,
                    "sql_template": compiled.sql_template,
                    "binds": compiled.binds,
                })],
            )
            .await;

        match result {
            Ok(value) => parse_execution_result(value),
            Err(err) => {
                error!(error = %err, "plan execution failed");
                self.logger
                    .log(EventKind::McpError {
                        request_id: Some(request_id),
                        error_class: err.classify().to_string(),
                        error: err.error_token(),
                        details: None,
                    })
                    .await
                    .ok();
                Err(err)
            }
        }
    }
}

fn parse_execution_result(value: serde_json::Value) -> GatewayResult<ExecutionResult> {
    serde_json::from_value(value).map_err(|e| GatewayError::Other { message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_result_round_trips_through_json() {
        let result = ExecutionResult {
            ok: true,
            query_id: "q1".into(),
            row_count: 10,
            sample_rows: vec![serde_json::json!({"a": 1})],
            bytes_scanned: 1024,
        };
        let json = serde_json::to_value(&result).unwrap();
        let parsed: ExecutionResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.query_id, "q1");
        assert_eq!(parsed.row_count, 10);
    }
}
