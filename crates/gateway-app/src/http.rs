//! HTTP surface (§6): the minimal administrative/health surface plus the
//! authenticated query/activity endpoints and the activation-link flow.
//! Everything here is thin — the real work lives in the crates this binary
//! wires together; handlers only translate HTTP in/out.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use gateway_core::envelope::PermissionEnvelope;
use gateway_core::plan::Plan;
use gateway_core::{GatewayError, GatewayResult};
use gateway_warehouse::reader::{ReadKind, TaggedRow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state::AppState;

/// Maps a [`GatewayError`]'s class to an HTTP status code, mirroring the
/// taxonomy in §7 rather than inventing a parallel one.
fn status_for(err: &GatewayError) -> actix_web::http::StatusCode {
    use actix_web::http::StatusCode;
    match err.classify() {
        "auth" => StatusCode::UNAUTHORIZED,
        "authz" => StatusCode::FORBIDDEN,
        "quota" => StatusCode::TOO_MANY_REQUESTS,
        "validation" => StatusCode::BAD_REQUEST,
        "deploy" => StatusCode::CONFLICT,
        "transport" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error_class: String,
    error: String,
}

fn error_response(err: GatewayError) -> HttpResponse {
    HttpResponse::build(status_for(&err)).json(ErrorBody {
        ok: false,
        error_class: err.classify().to_string(),
        error: err.error_token(),
    })
}

/// Validates `token`/`nonce` and checks the resulting envelope allows `tool`,
/// the same auth path the WebSocket edge's `tools/call` handling takes
/// (§4.10 step 2b), reused here so the HTTP surface enforces identical rules.
async fn authenticate(state: &AppState, token: &str, nonce: &str, tool: &str) -> GatewayResult<PermissionEnvelope> {
    let envelope = state.tokens.validate(token, nonce).await?;
    if !envelope.allows_tool(tool) {
        return Err(GatewayError::ToolNotAllowed { tool: tool.to_string() });
    }
    Ok(envelope)
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub(crate) struct HealthResponse {
    status: &'static str,
    snowflake: &'static str,
    templates: Vec<&'static str>,
    timestamp: chrono::DateTime<Utc>,
    uptime_seconds: u64,
}

/// `GET /health` (§6), enriched with process uptime beyond the bare
/// `{status, snowflake, templates, timestamp}` spec.md names (§10.6).
#[utoipa::path(get, path = "/health", tag = "health", responses((status = 200, body = HealthResponse)))]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        snowflake: "connected",
        templates: vec!["top_n", "recent_n", "breakdown_by_type", "summary"],
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Liveness probe distinct from `/health`'s richer body, matching the
/// donor's `live`/`ready` split (§10.6).
#[utoipa::path(get, path = "/live", tag = "health", responses((status = 200, description = "process is alive")))]
pub async fn live() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "live"}))
}

#[derive(Debug, Serialize)]
struct SchemaMetaResponse {
    views: HashMap<String, gateway_core::schema_contract::SourceSpec>,
    tables: HashMap<String, gateway_core::schema_contract::SourceSpec>,
    hash: String,
}

/// `GET /meta/schema → {views, tables, hash}` (§6): the contract flattened
/// across every schema namespace so clients self-validating a plan don't
/// need to know the namespace layout, only source names.
pub async fn meta_schema(state: web::Data<AppState>) -> impl Responder {
    let mut views = HashMap::new();
    let mut tables = HashMap::new();
    for namespace in state.contract.schemas.values() {
        views.extend(namespace.views.clone());
        tables.extend(namespace.tables.clone());
    }
    HttpResponse::Ok().json(SchemaMetaResponse { views, tables, hash: state.schema_hash.clone() })
}

/// `GET /meta/schema.hash` (§6): served standalone so clients can cheaply
/// poll for contract changes without re-fetching the whole document.
pub async fn meta_schema_hash(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(state.schema_hash.clone())
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub(crate) struct UserMetaResponse {
    theme: String,
    timezone: String,
}

/// `GET /meta/user → {theme, timezone}` (§6). The gateway carries no
/// per-user preference store (out of scope, §1 Non-goals: business
/// dashboards); this returns the fixed system defaults every client falls
/// back to, recorded as an Open Question resolution in DESIGN.md.
#[utoipa::path(get, path = "/meta/user", tag = "meta", responses((status = 200, body = UserMetaResponse)))]
pub async fn meta_user() -> impl Responder {
    HttpResponse::Ok().json(UserMetaResponse { theme: "system".to_string(), timezone: "UTC".to_string() })
}

/// `POST /api/validate` (§6): a dry-compile against the schema contract,
/// never touches the warehouse and never requires auth — it is the same
/// self-validation surface `/meta/schema` exists to support.
pub async fn api_validate(state: web::Data<AppState>, plan: web::Json<Plan>) -> impl Responder {
    let report = gateway_query::validate(&plan, &state.contract);
    if !report.valid {
        crate::metrics::COMPILER_REJECTIONS
            .with_label_values(&["validation_failed"])
            .inc();
    }
    HttpResponse::Ok().json(report)
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    token: String,
    nonce: String,
    plan: Plan,
}

/// `POST /api/query` (§6): authenticated plan execution, the HTTP
/// equivalent of a `tools/call` invocation of the `query` tool (§4.10).
pub async fn api_query(state: web::Data<AppState>, body: web::Json<QueryRequest>) -> impl Responder {
    let QueryRequest { token, nonce, plan } = body.into_inner();
    let envelope = match authenticate(&state, &token, &nonce, "query").await {
        Ok(envelope) => envelope,
        Err(err) => return error_response(err),
    };

    let request_id = uuid::Uuid::new_v4();
    match state.executor.execute(request_id, plan, &envelope).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    token: String,
    nonce: String,
    /// The request id whose projected activity to return. The reader's
    /// consistency lookup (C9) resolves exact object ids rather than a
    /// free actor-scoped search (see DESIGN.md Open Questions — the same
    /// gap `TokenIdentityService::permission_envelope` already documents
    /// for username-keyed lookups).
    request_id: uuid::Uuid,
}

#[derive(Debug, Serialize)]
struct ActivityResponse {
    rows: Vec<TaggedRow>,
}

/// `POST /api/activity` (§6, §4.9): recent events for one request id,
/// read with read-after-write awareness via the consistency reader.
pub async fn api_activity(state: web::Data<AppState>, body: web::Json<ActivityRequest>) -> impl Responder {
    let ActivityRequest { token, nonce, request_id } = body.into_inner();
    if let Err(err) = authenticate(&state, &token, &nonce, "activity").await {
        return error_response(err);
    }

    let object_id = format!("request/{request_id}");
    match state.reader.read_latest(ReadKind::Activity, &object_id).await {
        Ok(rows) => HttpResponse::Ok().json(ActivityResponse { rows }),
        Err(err) => error_response(err),
    }
}

/// `GET /activate/<code>` (§6): a minimal confirmation page. The actual
/// exchange happens on `POST` to the same path; this page exists so a user
/// following an emailed link sees something before confirming.
pub async fn activate_confirm_page(path: web::Path<String>) -> impl Responder {
    let code = path.into_inner();
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(format!(
        "<!doctype html><html><body><h1>Activate access</h1>\
         <p>Confirm activation for code <code>{code}</code>.</p>\
         <form method=\"post\" action=\"/activate/{code}\">\
         <button type=\"submit\">Activate</button></form></body></html>"
    ))
}

/// `POST /activate/<code>` (§6): validates the code, issues a token, and
/// redirects to the `claudecode://activate` deeplink. Rate limited to 10
/// activations per IP per 15 minutes.
pub async fn activate_consume(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let code = path.into_inner();
    let ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();

    if !state.activations.rate_limiter.allow(&ip) {
        return error_response(GatewayError::RateLimited);
    }

    match state.activations.consume(&code).await {
        Ok((issued, username)) => HttpResponse::Found()
            .append_header((
                "Location",
                format!("claudecode://activate?token={}&user={}", issued.token, username),
            ))
            .finish(),
        Err(err) => error_response(err),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/live", web::get().to(live))
        .route("/meta/schema", web::get().to(meta_schema))
        .route("/meta/schema.hash", web::get().to(meta_schema_hash))
        .route("/meta/user", web::get().to(meta_user))
        .route("/api/validate", web::post().to(api_validate))
        .route("/api/query", web::post().to(api_query))
        .route("/api/activity", web::post().to(api_activity))
        .route("/activate/{code}", web::get().to(activate_confirm_page))
        .route("/activate/{code}", web::post().to(activate_consume));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use gateway_core::schema_contract::SchemaContract;
    use gateway_core::GatewayConfig;
    use serial_test::serial;

    const CONTRACT_JSON: &str = r#"{
        "database": "ANALYTICS",
        "schemas": {"PUBLIC": {"tables": {}, "views": {
            "events": {"columns": [
                {"name": "EVENT_ID", "data_type": "STRING"},
                {"name": "HOUR", "data_type": "TIMESTAMP"},
                {"name": "ACTOR", "data_type": "STRING"}
            ], "is_base_event_row": true}
        }}},
        "allowed_aggregations": ["COUNT", "SUM"],
        "allowed_operators": ["=", ">"],
        "allowed_grains": ["DAY", "HOUR"],
        "security": {"max_rows_per_query": 10000},
        "activity_namespace": {"prefix": "mcp", "standard_activities": []}
    }"#;

    /// Builds a fully bootstrapped [`AppState`] without touching the
    /// network: [`WarehouseSession::open`] only derives local auth material
    /// from config, so a fake account/password is enough offline.
    async fn test_state() -> web::Data<AppState> {
        std::env::set_var("SNOWFLAKE_ACCOUNT", "test_account");
        std::env::set_var("SNOWFLAKE_USERNAME", "test_user");
        std::env::set_var("SNOWFLAKE_PASSWORD", "test_password");
        std::env::set_var("SNOWFLAKE_WAREHOUSE", "TEST_WH");
        std::env::set_var("SNOWFLAKE_DATABASE", "ANALYTICS");
        std::env::set_var("SNOWFLAKE_SCHEMA", "PUBLIC");
        std::env::set_var("GATEWAY_TOKEN_PEPPER", "at-least-sixteen-characters");

        let config = GatewayConfig::from_env().expect("config from env");
        config.validate().expect("config validates");
        let contract = SchemaContract::parse(CONTRACT_JSON).expect("contract parses");
        let state = AppState::bootstrap(config, contract).await.expect("bootstrap succeeds");
        web::Data::from(state)
    }

    #[actix_web::test]
    #[serial]
    async fn health_reports_ok_status() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state).route("/health", web::get().to(health))).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert!(body["templates"].as_array().unwrap().contains(&serde_json::json!("top_n")));
    }

    #[actix_web::test]
    async fn live_reports_static_body() {
        let app = test::init_service(App::new().route("/live", web::get().to(live))).await;
        let req = test::TestRequest::get().uri("/live").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "live");
    }

    #[actix_web::test]
    async fn meta_user_returns_fixed_defaults() {
        let app = test::init_service(App::new().route("/meta/user", web::get().to(meta_user))).await;
        let req = test::TestRequest::get().uri("/meta/user").to_request();
        let resp = test::call_service(&app, req).await;

        let body: UserMetaResponse = test::read_body_json(resp).await;
        assert_eq!(body.theme, "system");
        assert_eq!(body.timezone, "UTC");
    }

    #[actix_web::test]
    #[serial]
    async fn meta_schema_flattens_namespaces_and_includes_hash() {
        let state = test_state().await;
        let app = test::init_service(
            App::new().app_data(state).route("/meta/schema", web::get().to(meta_schema)),
        )
        .await;

        let req = test::TestRequest::get().uri("/meta/schema").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["views"]["events"].is_object());
        assert!(body["hash"].as_str().unwrap().len() > 0);
    }

    #[actix_web::test]
    #[serial]
    async fn api_validate_rejects_unknown_source_and_counts_rejection() {
        let state = test_state().await;
        let app = test::init_service(
            App::new().app_data(state).route("/api/validate", web::post().to(api_validate)),
        )
        .await;

        let plan = serde_json::json!({
            "source": "not_a_real_source",
            "dimensions": [],
            "measures": [],
            "filters": [],
            "order_by": [],
            "top_n": 10
        });
        let req = test::TestRequest::post().uri("/api/validate").set_json(&plan).to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["valid"], false);
        assert!(!body["errors"].as_array().unwrap().is_empty());
    }

    #[actix_web::test]
    #[serial]
    async fn api_query_without_token_is_unauthorized() {
        let state = test_state().await;
        let app = test::init_service(
            App::new().app_data(state).route("/api/query", web::post().to(api_query)),
        )
        .await;

        let body = serde_json::json!({
            "token": "tk_not_a_real_token",
            "nonce": "n1",
            "plan": {
                "source": "events",
                "dimensions": [],
                "measures": [],
                "filters": [],
                "order_by": [],
                "top_n": 10
            }
        });
        let req = test::TestRequest::post().uri("/api/query").set_json(&body).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);

        let parsed: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(parsed["error_class"], "auth");
    }
}
