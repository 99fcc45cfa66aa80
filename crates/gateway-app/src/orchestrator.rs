//! # Request Orchestrator (C10)
//!
//! Per-connection request handling (§4.10): validates the token and nonce
//! (C3), classifies the request (C7), dispatches a Tier 1 template or a
//! Tier 2/3 interpreted plan through the validator/compiler/executor
//! (C5/C4/C6), enforces the envelope's row and runtime budgets, and streams
//! progress back to the client.

use gateway_core::envelope::PermissionEnvelope;
use gateway_core::events::EventKind;
use gateway_core::plan::{Aggregation, Filter, Measure, Operator, Plan};
use gateway_core::{GatewayError, GatewayResult};
use gateway_deploy::{DdlObjectKind, DdlSource, DeployRequest};
use gateway_mcp::{ClientMessage, PanelRequest, ServerMessage, SqlResultMetadata};
use gateway_query::validator;
use gateway_router::templates::{ExtractedParams, Template};
use gateway_router::{classify, escalate_after_tier2_failure, log_routing_outcome, RoutingDecision, Tier};
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::metrics;
use crate::state::AppState;

/// Per-connection state the orchestrator owns (§4.10): `{session_id, ws,
/// auth_envelope?, conversation_context, pending_requests}`. The actual `ws`
/// handle is the actor in `ws.rs`; this struct is the non-transport half.
#[derive(Default)]
pub struct SessionCtx {
    pub session_id: String,
    pub auth_envelope: Option<PermissionEnvelope>,
    pub token_hash: Option<String>,
    pub conversation_context: Vec<String>,
    pub pending_requests: u32,
}

impl SessionCtx {
    pub fn new(session_id: String) -> Self {
        Self { session_id, ..Default::default() }
    }
}

/// Dispatches one inbound [`ClientMessage`] and returns the server messages
/// to send back, in order (§4.10 step 2).
#[instrument(skip(state, ctx, msg), fields(session = %ctx.session_id))]
pub async fn handle_client_message(state: &AppState, ctx: &mut SessionCtx, msg: ClientMessage) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::Register { session_id } => {
            ctx.session_id = session_id;
            vec![ServerMessage::Info { content: "registered".to_string() }]
        }
        ClientMessage::UserMessage { content, .. } => {
            ctx.conversation_context.push(content.clone());
            route_and_run(state, ctx, &content, None).await
        }
        ClientMessage::ExecutePanel { panel, .. } => run_panel(state, ctx, panel, None).await,
        ClientMessage::ToolsCall { name, arguments, token, nonce, .. } => {
            handle_tools_call(state, ctx, name, arguments, token, nonce).await
        }
    }
}

async fn handle_tools_call(
    state: &AppState,
    ctx: &mut SessionCtx,
    name: String,
    arguments: serde_json::Value,
    token: String,
    nonce: String,
) -> Vec<ServerMessage> {
    let request_id = Uuid::new_v4();
    let start = Instant::now();

    let envelope = match state.tokens.validate(&token, &nonce).await {
        Ok(envelope) => envelope,
        Err(err) => return vec![terminal_error(state, request_id, &err, 0).await],
    };
    let token_hash = gateway_auth::hash_token_with_pepper(&token, &state.config.auth.token_pepper);

    if !envelope.allows_tool(&name) {
        let err = GatewayError::ToolNotAllowed { tool: name.clone() };
        return vec![terminal_error(state, request_id, &err, 0).await];
    }

    ctx.auth_envelope = Some(envelope.clone());
    ctx.token_hash = Some(token_hash.clone());

    if let Err(err) = check_runtime_budget(state, &token_hash, &envelope, Tier::Tier1.expected_seconds()) {
        return vec![terminal_error(state, request_id, &err, 0).await];
    }

    state.session.set_query_tag(&format!("tool:{name}"), Some(state.schema_hash.clone()));

    let result = if name == "dev.claim" || name == "dev.deploy" {
        run_dev_tool(state, &name, &arguments).await
    } else if let Some(params) = gateway_router::templates::try_match(&name.replace('_', " ")) {
        run_plan_for_template(state, request_id, &params, &envelope, &arguments).await
    } else {
        match serde_json::from_value::<Plan>(arguments) {
            Ok(plan) => execute_plan(state, request_id, plan, &envelope).await,
            Err(e) => Err(GatewayError::BadSchemaContract { message: e.to_string() }),
        }
    };

    finish_request(state, request_id, &name, 1, start, &token_hash, &envelope, result).await
}

/// Tier-1-through-Tier-3 classification and dispatch for a free-form user
/// message (§4.10 step 2c). `arguments_hint` carries pre-extracted Tier 1
/// params when the caller already has them (tools/call naming a template).
async fn route_and_run(state: &AppState, ctx: &mut SessionCtx, content: &str, arguments_hint: Option<&ExtractedParams>) -> Vec<ServerMessage> {
    let request_id = Uuid::new_v4();
    let start = Instant::now();

    let envelope = match ctx.auth_envelope.clone() {
        Some(envelope) => envelope,
        None => return vec![ServerMessage::from_gateway_error(&GatewayError::Unauthenticated)],
    };
    let token_hash = ctx.token_hash.clone().unwrap_or_default();

    let mut decision = classify(content);
    if let Some(hint) = arguments_hint {
        decision.params = Some(hint.clone());
    }

    if let Err(err) = check_runtime_budget(state, &token_hash, &envelope, decision.tier.expected_seconds()) {
        return vec![terminal_error(state, request_id, &err, 0).await];
    }

    let outcome = match decision.tier {
        Tier::Tier1 => {
            let params = decision.params.clone().expect("tier 1 decision always carries params");
            execute_tier1(state, request_id, &params, &envelope).await
        }
        Tier::Tier2 => match state.interpreter.interpret_tier2(content).await {
            Ok(gateway_interpreter::Tier2Outcome::Template { template, params }) => {
                match template_from_name(&template, params) {
                    Some(params) => execute_tier1(state, request_id, &params, &envelope).await,
                    None => {
                        let escalated = escalate_after_tier2_failure(&decision);
                        decision = escalated;
                        run_tier3(state, request_id, content, &envelope).await
                    }
                }
            }
            Ok(gateway_interpreter::Tier2Outcome::Reply { content }) => Ok(RunOutcome::Reply(content)),
            Err(_) => {
                let escalated = escalate_after_tier2_failure(&decision);
                decision = escalated;
                run_tier3(state, request_id, content, &envelope).await
            }
        },
        Tier::Tier3 => run_tier3(state, request_id, content, &envelope).await,
    };

    let actual_ms = start.elapsed().as_millis() as u64;
    let success = outcome.is_ok();
    let tier_number = match decision.tier {
        Tier::Tier1 => 1,
        Tier::Tier2 => 2,
        Tier::Tier3 => 3,
    };
    log_routing_outcome(&state.logger, &decision, actual_ms, decision.tier.expected_cost(), success)
        .await
        .ok();

    finish_request(state, request_id, "user-message", tier_number, start, &token_hash, &envelope, outcome).await
}

enum RunOutcome {
    Reply(String),
    SqlResult(gateway_query::ExecutionResult, String),
}

async fn execute_tier1(state: &AppState, request_id: Uuid, params: &ExtractedParams, envelope: &PermissionEnvelope) -> GatewayResult<RunOutcome> {
    let plan = template_to_plan(state, params)?;
    let result = execute_plan_inner(state, request_id, plan, envelope).await?;
    Ok(RunOutcome::SqlResult(result, params.template.name().to_string()))
}

async fn run_tier3(state: &AppState, request_id: Uuid, content: &str, envelope: &PermissionEnvelope) -> GatewayResult<RunOutcome> {
    let plan = state.interpreter.interpret_tier3(content, &state.contract).await?;
    let report = validator::validate(&plan, &state.contract);
    if !report.valid {
        metrics::COMPILER_REJECTIONS.with_label_values(&["validation_failed"]).inc();
        return Err(GatewayError::BadSchemaContract { message: report.errors.join("; ") });
    }
    let result = execute_plan_inner(state, request_id, plan, envelope).await?;
    Ok(RunOutcome::SqlResult(result, "tier3".to_string()))
}

async fn run_plan_for_template(
    state: &AppState,
    request_id: Uuid,
    params: &ExtractedParams,
    envelope: &PermissionEnvelope,
    _arguments: &serde_json::Value,
) -> GatewayResult<RunOutcome> {
    execute_tier1(state, request_id, params, envelope).await
}

async fn execute_plan(state: &AppState, request_id: Uuid, plan: Plan, envelope: &PermissionEnvelope) -> GatewayResult<RunOutcome> {
    let result = execute_plan_inner(state, request_id, plan, envelope).await?;
    Ok(RunOutcome::SqlResult(result, "tools/call".to_string()))
}

async fn execute_plan_inner(state: &AppState, request_id: Uuid, plan: Plan, envelope: &PermissionEnvelope) -> GatewayResult<gateway_query::ExecutionResult> {
    let result = state.executor.execute(request_id, plan, envelope).await;
    if let Err(err) = &result {
        if err.classify() == "validation" {
            metrics::COMPILER_REJECTIONS.with_label_values(&[&err.error_token()]).inc();
        }
    }
    result
}

/// Dispatches the `dev.claim`/`dev.deploy` tool surface (§4.8) onto the
/// deployment gateway's `claim`/`release`/`validate`/`deploy`/`discover`
/// operations, mirroring the donor's single `dev(action, params)` stored
/// procedure contract one level up: the MCP-facing tool name picks the
/// lease-vs-object half of the surface, `arguments.action` picks the
/// specific operation within it.
async fn run_dev_tool(state: &AppState, tool: &str, arguments: &serde_json::Value) -> GatewayResult<RunOutcome> {
    let action = arguments.get("action").and_then(|v| v.as_str()).unwrap_or_default();

    let reply = match (tool, action) {
        ("dev.claim", "claim") => {
            let app_name = str_field(arguments, "app_name")?;
            let namespace = str_field(arguments, "namespace")?;
            let agent_id = str_field(arguments, "agent_id")?;
            let lease_id = str_field(arguments, "lease_id")?;
            let ttl_seconds = arguments.get("ttl_seconds").and_then(|v| v.as_u64()).unwrap_or(3600);
            state.deploy.leases().claim(&app_name, &namespace, &agent_id, &lease_id, ttl_seconds).await?;
            serde_json::json!({"ok": true, "lease_id": lease_id})
        }
        ("dev.claim", "release") => {
            let lease_id = str_field(arguments, "lease_id")?;
            state.deploy.leases().release(&lease_id).await?;
            serde_json::json!({"ok": true})
        }
        ("dev.deploy", "validate") => {
            let source = ddl_source_from(arguments)?;
            let (kind, object_name) = state.deploy.validate(source).await?;
            serde_json::json!({"ok": true, "object_type": ddl_kind_name(kind), "object_name": object_name})
        }
        ("dev.deploy", "deploy") => {
            let source = ddl_source_from(arguments)?;
            let request: DeployRequest = serde_json::from_value(arguments.clone())
                .map_err(|e| GatewayError::BadSchemaContract { message: e.to_string() })?;
            match state.deploy.deploy(source, request).await {
                Ok(result) => {
                    metrics::DEPLOY_OUTCOMES.with_label_values(&[&result.object_type, "success"]).inc();
                    serde_json::to_value(&result).unwrap_or_default()
                }
                Err(err) => {
                    metrics::DEPLOY_OUTCOMES.with_label_values(&["unknown", "failure"]).inc();
                    return Err(err);
                }
            }
        }
        ("dev.deploy", "discover") => {
            let filter = arguments.get("filter").and_then(|v| v.as_str());
            let rows = state.deploy.discover(filter).await?;
            serde_json::json!({"ok": true, "objects": rows})
        }
        _ => {
            return Err(GatewayError::UnknownSource { source: format!("{tool}:{action}") });
        }
    };

    Ok(RunOutcome::Reply(reply.to_string()))
}

fn ddl_kind_name(kind: DdlObjectKind) -> &'static str {
    match kind {
        DdlObjectKind::View => "view",
        DdlObjectKind::Procedure => "procedure",
        DdlObjectKind::Function => "function",
    }
}

fn str_field(arguments: &serde_json::Value, key: &str) -> GatewayResult<String> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GatewayError::BadSchemaContract { message: format!("missing field: {key}") })
}

fn ddl_source_from(arguments: &serde_json::Value) -> GatewayResult<DdlSource> {
    if let Some(stage_url) = arguments.get("stage_url").and_then(|v| v.as_str()) {
        let expected_md5 = arguments.get("expected_md5").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Ok(DdlSource::Stage { stage_url: stage_url.to_string(), expected_md5 })
    } else if let Some(ddl) = arguments.get("ddl").and_then(|v| v.as_str()) {
        Ok(DdlSource::Inline(ddl.to_string()))
    } else {
        Err(GatewayError::BadSchemaContract { message: "dev tool call requires ddl or stage_url".to_string() })
    }
}

async fn run_panel(state: &AppState, ctx: &mut SessionCtx, panel: PanelRequest, _token_hint: Option<String>) -> Vec<ServerMessage> {
    let request_id = Uuid::new_v4();
    let start = Instant::now();
    let envelope = match ctx.auth_envelope.clone() {
        Some(envelope) => envelope,
        None => return vec![ServerMessage::from_gateway_error(&GatewayError::Unauthenticated)],
    };
    let token_hash = ctx.token_hash.clone().unwrap_or_default();
    let plan: Plan = panel.into();
    let outcome = execute_plan(state, request_id, plan, &envelope).await;
    finish_request(state, request_id, "execute_panel", 1, start, &token_hash, &envelope, outcome).await
}

async fn finish_request(
    state: &AppState,
    request_id: Uuid,
    tool: &str,
    tier: u8,
    start: Instant,
    token_hash: &str,
    envelope: &PermissionEnvelope,
    outcome: GatewayResult<RunOutcome>,
) -> Vec<ServerMessage> {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    state.runtime_usage.record(token_hash, (elapsed_ms / 1000) as i64);

    match outcome {
        Ok(RunOutcome::Reply(content)) => {
            log_processed(state, request_id, tool, tier, elapsed_ms, true).await;
            vec![ServerMessage::AssistantMessage { content }]
        }
        Ok(RunOutcome::SqlResult(result, template)) => {
            log_processed(state, request_id, tool, tier, elapsed_ms, true).await;
            vec![ServerMessage::SqlResult {
                template,
                count: result.sample_rows.len(),
                rows: result.sample_rows,
                metadata: SqlResultMetadata {
                    query_id: result.query_id,
                    execution_time_ms: elapsed_ms,
                    bytes_scanned: result.bytes_scanned,
                },
            }]
        }
        Err(err) => {
            warn!(error = %err, username = %envelope.username, "request failed");
            vec![terminal_error(state, request_id, &err, elapsed_ms).await]
        }
    }
}

async fn log_processed(state: &AppState, request_id: Uuid, tool: &str, tier: u8, execution_time_ms: u64, success: bool) {
    let tier_label = tier.to_string();
    metrics::REQUESTS_BY_TIER.with_label_values(&[&tier_label, &success.to_string()]).inc();
    metrics::REQUEST_DURATION.with_label_values(&[&tier_label]).observe(execution_time_ms as f64 / 1000.0);

    state
        .logger
        .log(EventKind::RequestProcessed {
            request_id,
            tier,
            tool: tool.to_string(),
            args_redacted: serde_json::json!({}),
            execution_time_ms,
            success,
            cost_estimate: match tier {
                1 => Tier::Tier1.expected_cost(),
                2 => Tier::Tier2.expected_cost(),
                _ => Tier::Tier3.expected_cost(),
            },
        })
        .await
        .ok();
}

async fn terminal_error(state: &AppState, request_id: Uuid, err: &GatewayError, _elapsed_ms: u64) -> ServerMessage {
    state
        .logger
        .log(EventKind::McpError {
            request_id: Some(request_id),
            error_class: err.classify().to_string(),
            error: err.error_token(),
            details: None,
        })
        .await
        .ok();
    ServerMessage::from_gateway_error(err)
}

/// Refuses the request locally — without ever invoking the warehouse —
/// when the envelope's remaining daily runtime budget cannot cover the
/// planner's estimate for this request (§5, §8 scenario 6: 295s used of a
/// 300s cap plus a ≥10s estimate must refuse with `runtime_exceeded`).
fn check_runtime_budget(state: &AppState, token_hash: &str, envelope: &PermissionEnvelope, estimate_seconds: i64) -> GatewayResult<()> {
    let used = state.runtime_usage.used_seconds(token_hash);
    if used + estimate_seconds >= envelope.daily_runtime_seconds {
        return Err(GatewayError::RuntimeExceeded { used_seconds: used, cap_seconds: envelope.daily_runtime_seconds });
    }
    Ok(())
}

fn template_from_name(name: &str, params_value: serde_json::Value) -> Option<ExtractedParams> {
    let template = match name {
        "top_n" => Template::TopN,
        "recent_n" => Template::RecentN,
        "breakdown_by_type" => Template::BreakdownByType,
        "summary" => Template::Summary,
        _ => return None,
    };
    Some(ExtractedParams {
        template,
        n: params_value.get("n").and_then(|v| v.as_i64()),
        hours: params_value.get("hours").and_then(|v| v.as_i64()),
    })
}

/// Materializes a Tier 1 template's extracted parameters into a concrete
/// [`Plan`] against the base event source (§4.7: closed-set parameterized
/// request shapes, no free-form parsing at this tier).
fn template_to_plan(state: &AppState, params: &ExtractedParams) -> GatewayResult<Plan> {
    let source = state
        .contract
        .base_event_source()
        .ok_or_else(|| GatewayError::UnknownSource { source: "<no base event source in schema contract>".to_string() })?
        .to_string();

    let plan = match params.template {
        Template::TopN => Plan {
            source,
            dimensions: vec!["ACTIVITY".to_string()],
            measures: vec![Measure { function: Aggregation::Count, column: "*".to_string() }],
            top_n: Some(params.n.unwrap_or(10)),
            order_by: vec![gateway_core::plan::OrderBy {
                column: "*".to_string(),
                direction: gateway_core::plan::SortDirection::Desc,
            }],
            ..Default::default()
        },
        Template::RecentN => Plan {
            source,
            filters: vec![Filter {
                column: "OCCURRED_AT".to_string(),
                operator: Operator::Gte,
                value: serde_json::json!(format!("DATEADD(HOUR, -{}, CURRENT_TIMESTAMP())", params.hours.unwrap_or(24))),
            }],
            top_n: Some(params.n.unwrap_or(100)),
            ..Default::default()
        },
        Template::BreakdownByType => Plan {
            source,
            dimensions: vec!["OBJECT_TYPE".to_string()],
            measures: vec![Measure { function: Aggregation::Count, column: "*".to_string() }],
            ..Default::default()
        },
        Template::Summary => Plan {
            source,
            measures: vec![Measure { function: Aggregation::Count, column: "*".to_string() }],
            ..Default::default()
        },
    };

    info!(template = params.template.name(), "materialized tier 1 plan");
    Ok(plan)
}
