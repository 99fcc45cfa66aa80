//! # Plan Validator (C5)
//!
//! Runs the same checks as the compiler (§4.4) but before compilation,
//! returning a soft `{valid, errors[], warnings[]}` report instead of
//! failing hard — callers use this to show inline feedback, and the
//! orchestrator (C10) always validates before compiling (§4.10).

use crate::compiler::compile;
use gateway_core::plan::Plan;
use gateway_core::schema_contract::SchemaContract;
use gateway_core::GatewayError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validates `plan` against `contract`. Never panics and never touches the
/// warehouse; a *dry compile* (actually running the compiler, §4.5) is
/// performed to reuse its checks, but the SQL it produces is discarded here.
pub fn validate(plan: &Plan, contract: &SchemaContract) -> ValidationReport {
    let mut report = ValidationReport { valid: true, errors: Vec::new(), warnings: Vec::new() };

    match compile(plan, contract) {
        Ok(_) => {}
        Err(err) => {
            report.valid = false;
            report.errors.push(format!("{}: {}", err.error_token(), err));
        }
    }

    if !plan.measures.is_empty() && plan.dimensions.is_empty() {
        report
            .warnings
            .push("measures without dimensions will return a single row".to_string());
    }

    if plan.top_n.is_none() {
        report.warnings.push("no limit specified — default will apply".to_string());
    }

    report
}

/// A *dry compile*: runs the compiler and returns the SQL it would produce
/// without ever reaching the executor (§4.5).
pub fn dry_compile(plan: &Plan, contract: &SchemaContract) -> Result<String, GatewayError> {
    compile(plan, contract).map(|compiled| compiled.sql_template)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> SchemaContract {
        SchemaContract::parse(
            r#"{
            "database": "ANALYTICS",
            "schemas": {"PUBLIC": {"tables": {}, "views": {
                "events": {"columns": [{"name": "EVENT_ID", "data_type": "STRING"}], "is_base_event_row": true}
            }}},
            "allowed_aggregations": ["COUNT"],
            "allowed_operators": ["="],
            "allowed_grains": ["DAY"],
            "security": {"max_rows_per_query": 10000},
            "activity_namespace": {"prefix": "mcp", "standard_activities": []}
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn warns_about_missing_limit() {
        let plan = Plan { source: "events".into(), ..Default::default() };
        let report = validate(&plan, &contract());
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("no limit specified")));
    }

    #[test]
    fn invalid_source_produces_error_and_is_not_valid() {
        let plan = Plan { source: "missing".into(), ..Default::default() };
        let report = validate(&plan, &contract());
        assert!(!report.valid);
        assert!(!report.errors.is_empty());
    }
}
