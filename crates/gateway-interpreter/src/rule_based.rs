//! A dependency-free interpreter used when no LLM is configured
//! (`LLM_ENABLED=false`, the default). Reuses the router's own Tier 1
//! template matcher for Tier 2 (§4.7: "LLM or rule-based"), and falls back
//! to a single default source for Tier 3 — a deliberately conservative
//! stand-in that keeps the pipeline functional without a real NL-to-plan
//! model.

use crate::interpreter::{Interpreter, Tier2Outcome};
use async_trait::async_trait;
use gateway_core::plan::Plan;
use gateway_core::schema_contract::SchemaContract;
use gateway_core::{GatewayError, GatewayResult};
use gateway_router::templates::try_match;

pub struct RuleBasedInterpreter;

#[async_trait]
impl Interpreter for RuleBasedInterpreter {
    async fn interpret_tier2(&self, text: &str) -> GatewayResult<Tier2Outcome> {
        let lower = text.to_lowercase();
        if let Some(params) = try_match(&lower) {
            return Ok(Tier2Outcome::Template {
                template: params.template.name().to_string(),
                params: serde_json::to_value(&params).unwrap_or(serde_json::Value::Null),
            });
        }
        Ok(Tier2Outcome::Reply {
            content: "I can help with specific counts, trends, or breakdowns — try asking for a top-N or a time-windowed view.".to_string(),
        })
    }

    async fn interpret_tier3(&self, _text: &str, contract: &SchemaContract) -> GatewayResult<Plan> {
        let first_source = contract
            .schemas
            .values()
            .flat_map(|ns| ns.views.keys().chain(ns.tables.keys()))
            .next()
            .cloned()
            .ok_or_else(|| GatewayError::CompileFailed {
                message: "no sources available in schema contract for rule-based fallback".into(),
            })?;

        Ok(Plan { source: first_source, ..Default::default() })
    }
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

    #[tokio::test]
    async fn tier2_prefers_a_matched_template() {
        let interpreter = RuleBasedInterpreter;
        let outcome = interpreter.interpret_tier2("top 5 pages").await.unwrap();
        assert!(matches!(outcome, Tier2Outcome::Template { template, .. } if template == "top_n"));
    }

    #[tokio::test]
    async fn tier2_replies_directly_when_no_template_matches() {
        let interpreter = RuleBasedInterpreter;
        let outcome = interpreter.interpret_tier2("how are you today").await.unwrap();
        assert!(matches!(outcome, Tier2Outcome::Reply { .. }));
    }

    #[tokio::test]
    async fn tier3_falls_back_to_the_first_contract_source() {
        let interpreter = RuleBasedInterpreter;
        let plan = interpreter.interpret_tier3("tell me a story about our users", &contract()).await.unwrap();
        assert_eq!(plan.source, "events");
    }
}
