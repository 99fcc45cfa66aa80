//! Shared types for the analytics gateway: the event model underpinning the
//! Two-Object-Store Law, the error taxonomy, environment configuration, the
//! structured query plan, the permission envelope, and the schema contract.

pub mod envelope;
pub mod error;
pub mod config;
pub mod events;
pub mod plan;
pub mod schema_contract;

pub use envelope::PermissionEnvelope;
pub use error::{GatewayError, GatewayResult};
pub use config::{ApiConfig, AuthConfig, GatewayConfig, InterpreterConfig, MonitoringConfig, WarehouseConfig, WarehouseCredentials};
pub use events::{EventKind, EventMetadata, ProcessedEvent, RawEnvelope, project_latest};
pub use plan::{Aggregation, Filter, Grain, Measure, OrderBy, Operator, Plan, SortDirection, SYSTEM_MAX_ROWS};
pub use schema_contract::SchemaContract;
