//! Process entrypoint: load configuration and the schema contract, bootstrap
//! every service (§4.10), then serve the HTTP/WebSocket edge.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use gateway_core::config::GatewayConfig;
use gateway_core::schema_contract::SchemaContract;
use gateway_warehouse::CircuitState;
use std::time::Duration;
use tracing::{info, warn};

use gateway_app::metrics;
use gateway_app::state::AppState;
use gateway_app::{http, openapi, ws};

/// Polls internal service state every few seconds to keep the
/// `circuit_breaker_state`/`logger_batch_mode` gauges honest (§10.6) without
/// threading metrics calls through every warehouse/logger call site.
fn spawn_gauge_poller(state: std::sync::Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let circuit_value = match state.session.circuit_state() {
                CircuitState::Closed => 0,
                CircuitState::HalfOpen => 1,
                CircuitState::Open => 2,
            };
            metrics::CIRCUIT_BREAKER_STATE
                .with_label_values(&["warehouse"])
                .set(circuit_value);
            metrics::LOGGER_BATCH_MODE
                .with_label_values(&["default"])
                .set(state.logger.is_batched().await as i64);
        }
    });
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::from_env().map_err(to_io_error)?;
    config.validate().map_err(to_io_error)?;

    let contract_json = std::fs::read_to_string(&config.api.schema_contract_path).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("failed to read schema contract at {}: {e}", config.api.schema_contract_path),
        )
    })?;
    let contract = SchemaContract::parse(&contract_json).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, format!("invalid schema contract: {e}"))
    })?;

    let state = AppState::bootstrap(config, contract).await.map_err(to_io_error)?;
    metrics::init_metrics()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    spawn_gauge_poller(state.clone());

    let bind_addr = format!("{}:{}", state.config.api.host, state.config.api.port);
    let cors_allow_any_origin = state.config.api.cors_allow_any_origin;
    info!(addr = %bind_addr, "starting gateway");

    HttpServer::new(move || {
        let cors = if cors_allow_any_origin {
            Cors::default().allow_any_origin().allow_any_method().allow_any_header().max_age(3600)
        } else {
            Cors::default().allowed_methods(vec!["GET", "POST"]).allow_any_header().max_age(3600)
        };

        App::new()
            .app_data(web::Data::from(state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(http::configure)
            .configure(ws::configure)
            .configure(metrics::configure)
            .configure(openapi::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await
}

fn to_io_error(err: gateway_core::GatewayError) -> std::io::Error {
    warn!(error = %err, "startup failed");
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}
