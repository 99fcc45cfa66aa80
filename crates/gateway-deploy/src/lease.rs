//! Namespace leases (§4.8): a time-bounded claim on an `(app, namespace)`
//! pair allowing an agent to deploy within that scope.

use chrono::{DateTime, Utc};
use gateway_core::events::EventKind;
use gateway_core::{GatewayError, GatewayResult};
use gateway_warehouse::reader::ConsistencyReader;
use gateway_warehouse::EventLogger;
use std::sync::Arc;
use tracing::instrument;

pub struct LeaseManager {
    logger: EventLogger,
    reader: Arc<ConsistencyReader>,
}

impl LeaseManager {
    pub fn new(logger: EventLogger, reader: Arc<ConsistencyReader>) -> Self {
        Self { logger, reader }
    }

    /// `claim(app_name, namespace, agent_id, lease_id, ttl_seconds)` (§4.8).
    #[instrument(skip(self))]
    pub async fn claim(&self, app_name: &str, namespace: &str, agent_id: &str, lease_id: &str, ttl_seconds: u64) -> GatewayResult<()> {
        self.logger
            .log(EventKind::DevClaim {
                lease_id: lease_id.to_string(),
                app_name: app_name.to_string(),
                namespace: namespace.to_string(),
                agent_id: agent_id.to_string(),
                ttl_seconds,
            })
            .await
    }

    /// `release(lease_id)` (§4.8).
    #[instrument(skip(self))]
    pub async fn release(&self, lease_id: &str) -> GatewayResult<()> {
        self.logger.log(EventKind::DevRelease { lease_id: lease_id.to_string() }).await
    }

    /// Whether `lease_id` is still active: claimed, not released, and
    /// within its TTL (§4.8 step 5).
    #[instrument(skip(self))]
    pub async fn is_active(&self, lease_id: &str) -> GatewayResult<bool> {
        let history = self.reader.read_object("lease", &format!("lease/{lease_id}")).await?;

        let Some(claim) = history
            .iter()
            .filter(|row| row.event.action == "dev.claim")
            .max_by_key(|row| row.event.occurred_at)
        else {
            return Ok(false);
        };

        let released = history
            .iter()
            .any(|row| row.event.action == "dev.release" && row.event.occurred_at >= claim.event.occurred_at);
        if released {
            return Ok(false);
        }

        let ttl_seconds = claim.event.attributes.get("ttl_seconds").and_then(|v| v.as_u64()).unwrap_or(0);
        let expires_at: DateTime<Utc> = claim.event.occurred_at + chrono::Duration::seconds(ttl_seconds as i64);
        Ok(expires_at > Utc::now())
    }

    /// Verifies the lease is active, returning `invalid_lease` otherwise
    /// (§4.8 step 5).
    pub async fn require_active(&self, lease_id: &str) -> GatewayResult<()> {
        if self.is_active(lease_id).await? {
            Ok(())
        } else {
            Err(GatewayError::InvalidLease { lease_id: lease_id.to_string() })
        }
    }
}
