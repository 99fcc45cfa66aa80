//! The stable signatures of the warehouse-side stored procedures the
//! gateway calls (§6). These are not implementations — the warehouse engine
//! is out of scope (§1) — but a typed description of the call contract every
//! client of [`gateway_warehouse::WarehouseSession`] binds parameters
//! against, so the narrow procedure surface stays enumerable at compile time
//! instead of drifting into ad-hoc string procedure names.

use serde::{Deserialize, Serialize};

/// The closed set of server-side procedures the gateway is allowed to call.
/// Nothing in the gateway ever composes ad-hoc SQL against the warehouse
/// outside of this enumeration (§1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Procedure {
    LogEvent,
    LogEventsBatch,
    ValidateQueryPlan,
    ExecuteQueryPlan,
    HandleRequest,
    ValidateToken,
    Dev,
    DdlDeploy,
    DdlDeployFromStage,
}

impl Procedure {
    pub fn name(&self) -> &'static str {
        match self {
            Procedure::LogEvent => "log_event",
            Procedure::LogEventsBatch => "log_events_batch",
            Procedure::ValidateQueryPlan => "validate_query_plan",
            Procedure::ExecuteQueryPlan => "execute_query_plan",
            Procedure::HandleRequest => "handle_request",
            Procedure::ValidateToken => "validate_token",
            Procedure::Dev => "dev",
            Procedure::DdlDeploy => "ddl_deploy",
            Procedure::DdlDeployFromStage => "ddl_deploy_from_stage",
        }
    }
}

/// A positional-argument call to a stored procedure. Object-valued arguments
/// are always passed as structured JSON, never string-concatenated into SQL
/// (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureCall {
    pub procedure: Procedure,
    pub args: Vec<serde_json::Value>,
}

impl ProcedureCall {
    pub fn new(procedure: Procedure, args: Vec<serde_json::Value>) -> Self {
        Self { procedure, args }
    }
}

/// The single-column VARIANT response every procedure call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub body: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedure_names_match_warehouse_contract() {
        assert_eq!(Procedure::ExecuteQueryPlan.name(), "execute_query_plan");
        assert_eq!(Procedure::DdlDeployFromStage.name(), "ddl_deploy_from_stage");
    }
}
