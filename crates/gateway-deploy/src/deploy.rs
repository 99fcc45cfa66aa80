//! # Deployment Gateway (C8)
//!
//! The second major warehouse-facing surface besides the executor. Manages
//! the server-side procedures C6 depends on under optimistic concurrency
//! (§4.8). All eight steps of the deploy algorithm run here; forbidden DDL
//! never reaches the warehouse, but rejected attempts still produce events.

use crate::ddl::{assert_single_statement, classify_and_check, DdlObjectKind};
use crate::lease::LeaseManager;
use chrono::Utc;
use gateway_core::events::EventKind;
use gateway_core::{GatewayError, GatewayResult};
use gateway_warehouse::reader::ConsistencyReader;
use gateway_warehouse::{EventLogger, WarehouseSession};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

const STAGE_FILE_SIZE_CAP_BYTES: u64 = 10 * 1024 * 1024;

/// Where the DDL content to deploy comes from (§4.8 `deploy`).
pub enum DdlSource {
    Inline(String),
    Stage { stage_url: String, expected_md5: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub object_type: String,
    pub name: String,
    pub provenance: String,
    pub reason: String,
    pub expected_version: Option<String>,
    pub lease_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResult {
    pub object_type: String,
    pub object_name: String,
    pub version: chrono::DateTime<Utc>,
    pub previous_version: Option<String>,
}

pub struct DeploymentGateway {
    session: Arc<WarehouseSession>,
    logger: EventLogger,
    reader: Arc<ConsistencyReader>,
    leases: LeaseManager,
}

impl DeploymentGateway {
    pub fn new(session: Arc<WarehouseSession>, logger: EventLogger, reader: Arc<ConsistencyReader>) -> Self {
        let leases = LeaseManager::new(logger.clone(), reader.clone());
        Self { session, logger, reader, leases }
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// `validate(ddl | stage_url)` (§4.8): compiles DDL in a sandbox without
    /// affecting production. Reuses the same resolve/parse/allow-list steps
    /// as `deploy`, stopping before the shadow compile touches the
    /// warehouse.
    #[instrument(skip(self, source))]
    pub async fn validate(&self, source: DdlSource) -> GatewayResult<(DdlObjectKind, String)> {
        let content = self.resolve_content(source).await?;
        let statement = assert_single_statement(&content)?;
        classify_and_check(&statement)
    }

    /// `discover(filter?)` (§4.8): enumerates the current schema
    /// projection, i.e. the latest `ddl.object.deployed` event per object.
    #[instrument(skip(self))]
    pub async fn discover(&self, filter: Option<&str>) -> GatewayResult<Vec<serde_json::Value>> {
        let rows = self
            .session
            .execute(
                "SELECT object_type, object_id, attributes FROM processed_events \
                 WHERE object_type = 'ddl_object' AND action = 'ddl.object.deployed' \
                 ORDER BY occurred_at DESC",
                vec![],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                filter
                    .map(|f| row.get("object_id").and_then(|v| v.as_str()).unwrap_or_default().contains(f))
                    .unwrap_or(true)
            })
            .collect())
    }

    /// `deploy(...)` (§4.8): runs all eight steps of the deploy algorithm.
    #[instrument(skip(self, source, request))]
    pub async fn deploy(&self, source: DdlSource, request: DeployRequest) -> GatewayResult<DeployResult> {
        match self.deploy_inner(source, &request).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(error = %err, object = %request.name, "deployment failed");
                self.logger
                    .log(EventKind::DdlDeployError {
                        object_name: request.name.clone(),
                        error_class: err.classify().to_string(),
                        error: err.error_token(),
                    })
                    .await
                    .ok();
                Err(err)
            }
        }
    }

    async fn deploy_inner(&self, source: DdlSource, request: &DeployRequest) -> GatewayResult<DeployResult> {
        // Step 1-2: resolve content (stage or inline) and assert single statement.
        let content = self.resolve_content(source).await?;
        let statement = assert_single_statement(&content)?;

        // Step 3: allow/deny list.
        let (kind, object_name) = classify_and_check(&statement)?;

        // Step 4: version gating.
        let previous_version = self.current_version(&object_name).await?;
        if let Some(expected) = &request.expected_version {
            let current = previous_version.clone().unwrap_or_default();
            if &current != expected {
                return Err(GatewayError::VersionConflict { current, expected: expected.clone() });
            }
        }

        // Step 5: lease check.
        if let Some(lease_id) = &request.lease_id {
            self.leases.require_active(lease_id).await?;
        }

        // Step 6: shadow-compile against a candidate name.
        self.shadow_compile(&statement, &object_name).await?;

        // Step 7: execute for real.
        self.session.execute(&statement, vec![]).await?;

        // Step 8: emit success event.
        let version = Utc::now();
        self.logger
            .log(EventKind::DdlObjectDeployed {
                object_type: kind_name(kind).to_string(),
                object_name: object_name.clone(),
                version,
                previous_version: previous_version.clone(),
                provenance: request.provenance.clone(),
                reason: request.reason.clone(),
                lease_id: request.lease_id.clone(),
                ddl_length: statement.len(),
            })
            .await?;

        info!(object = %object_name, "deployment succeeded");
        Ok(DeployResult { object_type: kind_name(kind).to_string(), object_name, version, previous_version })
    }

    async fn resolve_content(&self, source: DdlSource) -> GatewayResult<String> {
        match source {
            DdlSource::Inline(content) => Ok(content),
            DdlSource::Stage { stage_url, expected_md5 } => {
                let listing = self
                    .session
                    .execute("LIST ?", vec![serde_json::json!(stage_url)])
                    .await?;
                let entry = listing.first().ok_or_else(|| GatewayError::FileNotFound { stage_url: stage_url.clone() })?;
                let size = entry.get("size").and_then(|v| v.as_u64()).unwrap_or(0);
                if size > STAGE_FILE_SIZE_CAP_BYTES {
                    return Err(GatewayError::FileTooLarge { size_bytes: size, cap_bytes: STAGE_FILE_SIZE_CAP_BYTES });
                }
                let actual_md5 = entry.get("md5").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                if actual_md5 != expected_md5 {
                    return Err(GatewayError::ChecksumMismatch { expected_md5, actual_md5 });
                }
                let content_rows = self
                    .session
                    .execute("GET_STAGE_CONTENT(?)", vec![serde_json::json!(stage_url)])
                    .await?;
                let content = content_rows
                    .first()
                    .and_then(|v| v.get("content"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::FileNotFound { stage_url })?
                    .to_string();

                self.logger
                    .log(EventKind::DdlStageDeployed {
                        object_name: "pending".to_string(),
                        stage_url: entry.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        md5: actual_md5,
                    })
                    .await
                    .ok();

                Ok(content)
            }
        }
    }

    async fn current_version(&self, object_name: &str) -> GatewayResult<Option<String>> {
        let rows = self.reader.read_object("ddl_object", &format!("ddl_object/{object_name}")).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.event.action == "ddl.object.deployed")
            .max_by_key(|row| row.event.occurred_at)
            .map(|row| row.event.occurred_at.to_rfc3339()))
    }

    async fn shadow_compile(&self, statement: &str, object_name: &str) -> GatewayResult<()> {
        let candidate_name = format!("{object_name}_CANDIDATE");
        let candidate_statement = replace_first_ignore_case(statement, object_name, &candidate_name).ok_or_else(|| {
            GatewayError::CompileFailed {
                message: format!("could not locate object name {object_name} in statement for shadow compile"),
            }
        })?;

        let compile_result = self.session.execute(&candidate_statement, vec![]).await;
        match compile_result {
            Ok(_) => {
                self.session
                    .execute(&format!("DROP VIEW IF EXISTS {candidate_name}"), vec![])
                    .await
                    .ok();
                Ok(())
            }
            Err(err) => Err(GatewayError::CompileFailed { message: err.to_string() }),
        }
    }
}

/// Finds the first case-insensitive occurrence of `needle` in `haystack` and
/// replaces that exact (original-case) span with `replacement`. `object_name`
/// is always upper-cased by `classify_and_check`, but the statement text
/// keeps whatever casing the author wrote, so a plain [`str::replacen`]
/// silently no-ops on non-upper-case DDL — leaving the shadow compile step
/// executing the literal production statement (§4.8 step 6).
fn replace_first_ignore_case(haystack: &str, needle: &str, replacement: &str) -> Option<String> {
    if needle.is_empty() {
        return None;
    }
    let haystack_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();
    let start = haystack_lower.find(&needle_lower)?;
    let end = start + needle.len();
    let mut result = String::with_capacity(haystack.len() - needle.len() + replacement.len());
    result.push_str(&haystack[..start]);
    result.push_str(replacement);
    result.push_str(&haystack[end..]);
    Some(result)
}

fn kind_name(kind: DdlObjectKind) -> &'static str {
    match kind {
        DdlObjectKind::View => "view",
        DdlObjectKind::Procedure => "procedure",
        DdlObjectKind::Function => "function",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_matches_lowercase_spec_vocabulary() {
        assert_eq!(kind_name(DdlObjectKind::View), "view");
        assert_eq!(kind_name(DdlObjectKind::Procedure), "procedure");
    }

    #[test]
    fn replace_first_ignore_case_finds_original_case_object_name() {
        let statement = "create or replace view daily_active_users as select 1";
        let got = replace_first_ignore_case(statement, "DAILY_ACTIVE_USERS", "DAILY_ACTIVE_USERS_CANDIDATE").unwrap();
        assert_eq!(got, "create or replace view daily_active_users_CANDIDATE as select 1");
    }

    #[test]
    fn replace_first_ignore_case_none_when_name_absent() {
        let statement = "create or replace view other_view as select 1";
        assert!(replace_first_ignore_case(statement, "DAILY_ACTIVE_USERS", "DAILY_ACTIVE_USERS_CANDIDATE").is_none());
    }
}
