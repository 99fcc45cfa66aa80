//! # gateway-deploy
//!
//! The deployment/DDL gateway (C8, §4.8): namespace leases and the
//! server-side procedure lifecycle under optimistic concurrency. Every
//! object C6 executes against — views, procedures, functions — is deployed
//! through here first.

pub mod ddl;
pub mod deploy;
pub mod lease;

pub use ddl::{assert_single_statement, classify_and_check, DdlObjectKind};
pub use deploy::{DdlSource, DeployRequest, DeployResult, DeploymentGateway};
pub use lease::LeaseManager;
