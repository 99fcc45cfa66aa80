//! WebSocket edge for the client wire protocol (§6, §4.10). One actor per
//! connection, matching the donor's `StreamingWebSocket` actor shape: a
//! heartbeat loop guards against half-open connections, and async
//! orchestrator work is bridged back onto the actor via `do_send` rather
//! than blocking the actor's message loop.

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use gateway_core::events::EventKind;
use gateway_mcp::ClientMessage;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::orchestrator::{self, SessionCtx};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one round through the orchestrator, sent from the spawned
/// future back to the actor so it can mutate its own state and reply.
struct OrchestratorResult {
    ctx: SessionCtx,
    messages: Vec<gateway_mcp::ServerMessage>,
}

impl Message for OrchestratorResult {
    type Result = ();
}

pub struct GatewaySocket {
    hb: Instant,
    state: web::Data<AppState>,
    session: SessionCtx,
    connected_at: Instant,
}

impl GatewaySocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let session_id = Uuid::new_v4().to_string();
        Self {
            hb: Instant::now(),
            state,
            session: SessionCtx::new(session_id),
            connected_at: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(session = %act.session.session_id, "heartbeat timed out, dropping connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn dispatch(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let addr = ctx.address();
        let state = self.state.clone();
        let mut session = std::mem::take(&mut self.session);
        actix::spawn(async move {
            let messages = orchestrator::handle_client_message(&state, &mut session, msg).await;
            addr.do_send(OrchestratorResult { ctx: session, messages });
        });
    }
}

impl Actor for GatewaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        info!(session = %self.session.session_id, "session started");
        let logger = self.state.logger.clone();
        let session_id = self.session.session_id.clone();
        actix::spawn(async move {
            logger.log(EventKind::SessionStarted { session_id }).await.ok();
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let logger = self.state.logger.clone();
        let session_id = self.session.session_id.clone();
        let duration_ms = self.connected_at.elapsed().as_millis() as u64;
        actix::spawn(async move {
            logger.flush().await.ok();
            logger.log(EventKind::SessionEnded { session_id, duration_ms }).await.ok();
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for GatewaySocket {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "websocket protocol error");
                ctx.stop();
                return;
            }
        };

        match msg {
            ws::Message::Ping(bytes) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            ws::Message::Pong(_) => {
                self.hb = Instant::now();
            }
            ws::Message::Text(text) => {
                self.hb = Instant::now();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(parsed) => self.dispatch(parsed, ctx),
                    Err(err) => {
                        let error_msg = gateway_mcp::ServerMessage::from_gateway_error(
                            &gateway_core::GatewayError::BadSchemaContract { message: err.to_string() },
                        );
                        if let Ok(body) = serde_json::to_string(&error_msg) {
                            ctx.text(body);
                        }
                    }
                }
            }
            ws::Message::Binary(_) => {}
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<OrchestratorResult> for GatewaySocket {
    type Result = ();

    fn handle(&mut self, msg: OrchestratorResult, ctx: &mut Self::Context) {
        self.session = msg.ctx;
        for server_msg in msg.messages {
            if let Ok(body) = serde_json::to_string(&server_msg) {
                ctx.text(body);
            }
        }
    }
}

/// `ws://.../ws` upgrade entrypoint (§6: "WebSocket upgrade from HTTP").
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    ws::start(GatewaySocket::new(state), &req, stream)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(websocket_handler));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;
    use gateway_core::schema_contract::SchemaContract;
    use gateway_core::GatewayConfig;
    use serial_test::serial;

    const CONTRACT_JSON: &str = r#"{
        "database": "ANALYTICS",
        "schemas": {"PUBLIC": {"tables": {}, "views": {}}},
        "allowed_aggregations": ["COUNT"],
        "allowed_operators": ["="],
        "allowed_grains": ["DAY"],
        "security": {"max_rows_per_query": 10000},
        "activity_namespace": {"prefix": "mcp", "standard_activities": []}
    }"#;

    async fn test_state() -> web::Data<AppState> {
        std::env::set_var("SNOWFLAKE_ACCOUNT", "test_account");
        std::env::set_var("SNOWFLAKE_USERNAME", "test_user");
        std::env::set_var("SNOWFLAKE_PASSWORD", "test_password");
        std::env::set_var("SNOWFLAKE_WAREHOUSE", "TEST_WH");
        std::env::set_var("SNOWFLAKE_DATABASE", "ANALYTICS");
        std::env::set_var("SNOWFLAKE_SCHEMA", "PUBLIC");
        std::env::set_var("GATEWAY_TOKEN_PEPPER", "at-least-sixteen-characters");

        let config = GatewayConfig::from_env().expect("config from env");
        let contract = SchemaContract::parse(CONTRACT_JSON).expect("contract parses");
        let state = AppState::bootstrap(config, contract).await.expect("bootstrap succeeds");
        web::Data::from(state)
    }

    /// A plain GET with no WebSocket upgrade headers should fail the
    /// handshake rather than 404 — proving the route is wired to the actor
    /// entrypoint, not just present.
    #[actix_web::test]
    #[serial]
    async fn ws_route_rejects_non_upgrade_requests() {
        let state = test_state().await;
        let app = actix_web::test::init_service(
            actix_web::App::new().app_data(state).configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws").to_request();
        let resp = test::call_service(&app, req).await;
        assert_ne!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
        assert!(resp.status().is_client_error());
    }
}
