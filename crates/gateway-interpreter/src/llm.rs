//! Thin client for the optional third-party LLM aide (§1 Out of scope: the
//! LLM is an external collaborator; the gateway only shapes prompts and
//! parses its JSON reply). Used only when `LLM_ENABLED=true`.

use crate::interpreter::{Interpreter, Tier2Outcome};
use async_trait::async_trait;
use gateway_core::plan::Plan;
use gateway_core::schema_contract::SchemaContract;
use gateway_core::{GatewayError, GatewayResult, InterpreterConfig};
use std::time::Duration;
use tracing::{instrument, warn};

pub struct LlmInterpreter {
    http: reqwest::Client,
    config: InterpreterConfig,
}

impl LlmInterpreter {
    pub fn new(config: InterpreterConfig) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.tier3_timeout_seconds))
            .build()
            .map_err(|e| GatewayError::Transient { message: e.to_string() })?;
        Ok(Self { http, config })
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str, timeout: Duration) -> GatewayResult<String> {
        let base = self.config.llm_api_base.as_ref().ok_or_else(|| GatewayError::BadSchemaContract {
            message: "LLM_API_BASE not configured".into(),
        })?;

        let body = serde_json::json!({
            "model": self.config.llm_model,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
            "max_tokens": 1024,
        });

        let mut request = self.http.post(format!("{base}/v1/messages")).json(&body);
        if let Some(key) = &self.config.llm_api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| GatewayError::Timeout { seconds: timeout.as_secs() })?
            .map_err(|e| GatewayError::Transient { message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(GatewayError::Other { message: format!("llm returned {}", response.status()) });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Other { message: e.to_string() })?;

        value
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Other { message: "unexpected LLM response shape".into() })
    }
}

#[async_trait]
impl Interpreter for LlmInterpreter {
    #[instrument(skip(self, text))]
    async fn interpret_tier2(&self, text: &str) -> GatewayResult<Tier2Outcome> {
        let system = "You are a constrained query classifier. Reply with JSON matching \
            {\"kind\":\"Template\",\"template\":string,\"params\":object} or \
            {\"kind\":\"Reply\",\"content\":string}. Never invent a template name \
            outside {top_n, recent_n, breakdown_by_type, summary}.";
        let raw = self
            .complete(system, text, Duration::from_secs(self.config.tier2_timeout_seconds))
            .await?;
        serde_json::from_str(&raw).map_err(|e| {
            warn!(error = %e, "llm tier 2 response failed to parse, treating as plain reply");
            GatewayError::Other { message: format!("unparseable tier2 response: {e}") }
        })
    }

    #[instrument(skip(self, text, contract))]
    async fn interpret_tier3(&self, text: &str, contract: &SchemaContract) -> GatewayResult<Plan> {
        let schema_json = serde_json::to_string(contract).unwrap_or_default();
        let system = format!(
            "You translate analytics requests into a JSON Plan object with fields \
             {{source, dimensions[], measures[{{fn,column}}], filters[{{column,operator,value}}], \
             grain, top_n, order_by[{{column,direction}}]}}. Only use sources/columns present in \
             this schema contract: {schema_json}"
        );
        let raw = self
            .complete(&system, text, Duration::from_secs(self.config.tier3_timeout_seconds))
            .await?;
        serde_json::from_str(&raw).map_err(|e| GatewayError::CompileFailed { message: format!("llm produced an invalid plan: {e}") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: String) -> InterpreterConfig {
        InterpreterConfig {
            llm_enabled: true,
            llm_api_base: Some(base),
            llm_api_key: Some("test-key".into()),
            llm_model: "test-model".into(),
            tier2_timeout_seconds: 5,
            tier3_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn interpret_tier2_parses_a_template_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"text": "{\"kind\":\"Template\",\"template\":\"top_n\",\"params\":{\"n\":5}}"}]
            })))
            .mount(&server)
            .await;

        let interpreter = LlmInterpreter::new(config(server.uri())).unwrap();
        let outcome = interpreter.interpret_tier2("top 5 pages").await.unwrap();
        assert!(matches!(outcome, Tier2Outcome::Template { template, .. } if template == "top_n"));
    }

    #[tokio::test]
    async fn interpret_tier2_surfaces_upstream_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let interpreter = LlmInterpreter::new(config(server.uri())).unwrap();
        let err = interpreter.interpret_tier2("compare trends").await.unwrap_err();
        assert!(matches!(err, GatewayError::Other { .. }));
    }
}
