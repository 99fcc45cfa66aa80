//! # Consistency Reader (C9)
//!
//! Every read the gateway serves about recently-written state must account
//! for the fact that the processed lane is a projection that lags the
//! ingestion lane. Inside a short "fresh window" after a write, the reader
//! also scans the raw ingestion lane directly and merges it with whatever
//! the processed lane already has — tagging which rows came from which
//! source — rather than serving a stale view while the projection catches
//! up (§4.9).

use crate::session::WarehouseSession;
use gateway_core::events::{project_latest, ProcessedEvent};
use gateway_core::GatewayResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// How long after a write the reader still consults the raw ingestion lane
/// directly, rather than trusting the processed-lane projection alone.
pub const FRESH_WINDOW: Duration = Duration::from_secs(10);

const READ_BASE_DELAY: Duration = Duration::from_millis(400);
const READ_MAX_ATTEMPTS: u32 = 3;

/// What kind of entity a read targets; each maps to a distinct processed-lane
/// `object_type` family (§3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Schema,
    Namespace,
    Activity,
    Status,
}

impl ReadKind {
    fn object_type_prefix(&self) -> &'static str {
        match self {
            ReadKind::Schema => "ddl_object",
            ReadKind::Namespace => "lease",
            ReadKind::Activity => "request",
            ReadKind::Status => "session",
        }
    }
}

/// Tags whether a row in a read result came from the raw ingestion lane
/// (not yet projected) or the processed lane (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowSource {
    Raw,
    View,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedRow {
    pub source: RowSource,
    pub event: ProcessedEvent,
}

/// Reads recent state with awareness of ingestion/processed-lane lag.
pub struct ConsistencyReader {
    session: std::sync::Arc<WarehouseSession>,
}

impl ConsistencyReader {
    pub fn new(session: std::sync::Arc<WarehouseSession>) -> Self {
        Self { session }
    }

    /// Reads the latest known state for `kind`/`object_id`, consulting the
    /// raw ingestion lane in addition to the processed-lane projection when
    /// the object was written within [`FRESH_WINDOW`]. Retries transient
    /// warehouse failures up to [`READ_MAX_ATTEMPTS`] with a ~400ms base
    /// delay (§4.9).
    #[instrument(skip(self))]
    pub async fn read_latest(&self, kind: ReadKind, object_id: &str) -> GatewayResult<Vec<TaggedRow>> {
        self.read_object(kind.object_type_prefix(), object_id).await
    }

    /// Lower-level form of [`Self::read_latest`] for callers (e.g. the token
    /// service, §4.3) whose object types are not one of the four [`ReadKind`]
    /// families.
    #[instrument(skip(self))]
    pub async fn read_object(&self, object_type: &str, object_id: &str) -> GatewayResult<Vec<TaggedRow>> {
        let mut attempt = 0;
        loop {
            match self.read_once(object_type, object_id).await {
                Ok(rows) => return Ok(rows),
                Err(err) if err.is_retryable() && attempt + 1 < READ_MAX_ATTEMPTS => {
                    let delay = READ_BASE_DELAY * (attempt + 1);
                    debug!(attempt, ?delay, "retrying consistency read");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn read_once(&self, object_type: &str, object_id: &str) -> GatewayResult<Vec<TaggedRow>> {

        let processed_rows = self
            .session
            .execute(
                "SELECT event_id, occurred_at, action, actor_id, source, object_type, \
                 object_id, attributes, metadata FROM processed_events \
                 WHERE object_type = ? AND object_id = ? ORDER BY occurred_at DESC",
                vec![serde_json::json!(object_type), serde_json::json!(object_id)],
            )
            .await?;

        let mut processed: Vec<ProcessedEvent> = processed_rows
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();

        let newest_processed_at = processed.first().map(|e| e.occurred_at);
        let within_fresh_window = newest_processed_at
            .map(|ts| (chrono::Utc::now() - ts).num_seconds() < FRESH_WINDOW.as_secs() as i64)
            .unwrap_or(true);

        let mut raw_only = Vec::new();
        if within_fresh_window {
            let raw_rows = self
                .session
                .execute(
                    "SELECT payload, source_lane, received_at FROM raw_events \
                     WHERE received_at > DATEADD(second, -?, CURRENT_TIMESTAMP()) \
                     ORDER BY received_at DESC",
                    vec![serde_json::json!(FRESH_WINDOW.as_secs())],
                )
                .await?;

            let processed_ids: std::collections::HashSet<_> =
                processed.iter().map(|e| e.event_id).collect();

            for raw in raw_rows {
                if let Some(event) = raw
                    .get("payload")
                    .cloned()
                    .and_then(|p| serde_json::from_value::<ProcessedEvent>(p).ok())
                {
                    if event.identifies(object_type, object_id) && !processed_ids.contains(&event.event_id) {
                        raw_only.push(event);
                    }
                }
            }
        }

        let mut combined = Vec::new();
        combined.append(&mut processed);
        let raw_event_ids: Vec<_> = raw_only.iter().map(|e| e.event_id).collect();
        combined.extend(raw_only);

        // "Latest wins" even across the raw/processed boundary (§2).
        let shadow_actions = ["system.permission.revoked", "system.token.revoked", "dashboard.schedule.deleted"];
        let latest = project_latest(&combined, &shadow_actions);

        Ok(latest
            .into_values()
            .map(|event| TaggedRow {
                source: if raw_event_ids.contains(&event.event_id) { RowSource::Raw } else { RowSource::View },
                event: event.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_kind_maps_to_expected_object_type() {
        assert_eq!(ReadKind::Schema.object_type_prefix(), "ddl_object");
        assert_eq!(ReadKind::Activity.object_type_prefix(), "request");
    }
}
