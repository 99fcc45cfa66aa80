//! Shared application state (§4.10): every service the orchestrator wires
//! together, built once at startup from [`GatewayConfig`] and handed to
//! every route/WS session as `web::Data<AppState>`.

use gateway_auth::{ActivationService, TokenIdentityService};
use gateway_core::schema_contract::SchemaContract;
use gateway_core::{GatewayConfig, GatewayError, GatewayResult};
use gateway_deploy::DeploymentGateway;
use gateway_interpreter::{build_interpreter, Interpreter};
use gateway_query::PlanExecutor;
use gateway_warehouse::{ConsistencyReader, EventLogger, WarehouseSession};
use std::sync::Arc;

use crate::quota::RuntimeUsageTracker;

pub struct AppState {
    pub config: GatewayConfig,
    pub session: Arc<WarehouseSession>,
    pub logger: EventLogger,
    pub reader: Arc<ConsistencyReader>,
    pub tokens: Arc<TokenIdentityService>,
    pub activations: Arc<ActivationService>,
    pub contract: Arc<SchemaContract>,
    pub schema_hash: String,
    pub executor: Arc<PlanExecutor>,
    pub deploy: Arc<DeploymentGateway>,
    pub interpreter: Arc<dyn Interpreter>,
    pub runtime_usage: RuntimeUsageTracker,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Boots every component in dependency order: warehouse session first
    /// (C1), then the logger/reader that depend on it (C2, C9), then the
    /// services that depend on those (C3–C8).
    pub async fn bootstrap(config: GatewayConfig, contract: SchemaContract) -> GatewayResult<Arc<Self>> {
        let session = Arc::new(WarehouseSession::open(config.warehouse.clone()).await?);
        let logger = EventLogger::new(session.clone());
        logger.spawn_flush_task();

        let reader = Arc::new(ConsistencyReader::new(session.clone()));
        let contract = Arc::new(contract);
        let schema_json = serde_json::to_string(&*contract)
            .map_err(|e| GatewayError::BadSchemaContract { message: e.to_string() })?;
        let schema_hash = SchemaContract::content_hash(&schema_json);

        let tokens = Arc::new(TokenIdentityService::new(
            logger.clone(),
            reader.clone(),
            config.auth.token_pepper.clone(),
        ));
        let activations = Arc::new(ActivationService::new(logger.clone(), reader.clone(), tokens.clone()));

        let executor = Arc::new(PlanExecutor::new(session.clone(), logger.clone(), contract.clone()));
        let deploy = Arc::new(DeploymentGateway::new(session.clone(), logger.clone(), reader.clone()));
        let interpreter = build_interpreter(&config.interpreter)?;

        Ok(Arc::new(Self {
            config,
            session,
            logger,
            reader,
            tokens,
            activations,
            contract,
            schema_hash,
            executor,
            deploy,
            interpreter,
            runtime_usage: RuntimeUsageTracker::new(),
            start_time: std::time::Instant::now(),
        }))
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
