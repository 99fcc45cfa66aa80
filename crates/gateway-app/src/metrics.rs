//! Prometheus metrics (§10.6), exposed at `/metrics`: tier distribution,
//! compiler rejections, deploy outcomes, and logger batch-vs-single mode,
//! mirroring the donor's `monitoring::metrics` registry/gather pattern.

use actix_web::{HttpResponse, Responder};
use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Requests routed per tier, by outcome (§4.7/§4.10).
    pub static ref REQUESTS_BY_TIER: IntCounterVec = IntCounterVec::new(
        Opts::new("requests_by_tier_total", "Requests routed per tier")
            .namespace("gateway")
            .subsystem("router"),
        &["tier", "success"]
    ).unwrap();

    /// Wall-clock latency of a fully dispatched request, by tier.
    pub static ref REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("request_duration_seconds", "Request duration in seconds")
            .namespace("gateway")
            .subsystem("router")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 45.0]),
        &["tier"]
    ).unwrap();

    /// Plans rejected by the compiler/validator (C4/C5), by error token.
    pub static ref COMPILER_REJECTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("compiler_rejections_total", "Plans rejected by the compiler or validator")
            .namespace("gateway")
            .subsystem("query"),
        &["error_token"]
    ).unwrap();

    /// DDL deploy outcomes (C8), by object type and result.
    pub static ref DEPLOY_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("deploy_outcomes_total", "Deployment gateway outcomes")
            .namespace("gateway")
            .subsystem("deploy"),
        &["object_type", "outcome"]
    ).unwrap();

    /// Whether the event logger (C2) is currently batching, 1 for batched
    /// mode and 0 for single-event mode, per process.
    pub static ref LOGGER_BATCH_MODE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("logger_batch_mode", "1 when the event logger is in batched mode")
            .namespace("gateway")
            .subsystem("logger"),
        &["instance"]
    ).unwrap();

    /// Circuit breaker state per warehouse session (C1), 0=closed,
    /// 1=half-open, 2=open.
    pub static ref CIRCUIT_BREAKER_STATE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("circuit_breaker_state", "Warehouse circuit breaker state")
            .namespace("gateway")
            .subsystem("warehouse"),
        &["instance"]
    ).unwrap();
}

pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(REQUESTS_BY_TIER.clone()))?;
    REGISTRY.register(Box::new(REQUEST_DURATION.clone()))?;
    REGISTRY.register(Box::new(COMPILER_REJECTIONS.clone()))?;
    REGISTRY.register(Box::new(DEPLOY_OUTCOMES.clone()))?;
    REGISTRY.register(Box::new(LOGGER_BATCH_MODE.clone()))?;
    REGISTRY.register(Box::new(CIRCUIT_BREAKER_STATE.clone()))?;
    Ok(())
}

pub fn export_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode_to_string(&metric_families)
}

/// `GET /metrics` handler.
pub async fn metrics() -> impl Responder {
    match export_metrics() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(body),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.route("/metrics", actix_web::web::get().to(metrics));
}
