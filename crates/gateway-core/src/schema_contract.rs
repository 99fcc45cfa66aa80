//! The schema contract (§6): the JSON document that lists every source the
//! compiler/validator are allowed to touch, served to clients at
//! `/meta/schema` so they can self-validate, and hashed for the query tag.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub description: String,
    /// Whether this source is a base event row or a derived projection (§4.4).
    #[serde(default)]
    pub is_base_event_row: bool,
    #[serde(default)]
    pub required_columns: Vec<String>,
}

impl SourceSpec {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaNamespace {
    #[serde(default)]
    pub tables: HashMap<String, SourceSpec>,
    #[serde(default)]
    pub views: HashMap<String, SourceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub max_rows_per_query: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityNamespace {
    pub prefix: String,
    #[serde(default)]
    pub standard_activities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContract {
    pub database: String,
    pub schemas: HashMap<String, SchemaNamespace>,
    pub allowed_aggregations: Vec<String>,
    pub allowed_operators: Vec<String>,
    pub allowed_grains: Vec<String>,
    pub security: SecurityPolicy,
    pub activity_namespace: ActivityNamespace,
    #[serde(default)]
    pub validation_rules: serde_json::Value,
}

impl SchemaContract {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Look up a source by unqualified name across every schema namespace's
    /// tables and views. Sources names in the registry are treated as
    /// case-sensitive on the dotted-name but we compare case-insensitively
    /// to match the compiler's upper-casing of identifiers.
    pub fn find_source(&self, source: &str) -> Option<&SourceSpec> {
        for namespace in self.schemas.values() {
            if let Some(spec) = namespace
                .tables
                .iter()
                .chain(namespace.views.iter())
                .find(|(name, _)| name.eq_ignore_ascii_case(source))
                .map(|(_, spec)| spec)
            {
                return Some(spec);
            }
        }
        None
    }

    /// The unqualified name of the first base-event-row source found,
    /// preferred as the default source for Tier 1 templates (§4.7) that
    /// don't name one explicitly.
    pub fn base_event_source(&self) -> Option<&str> {
        for namespace in self.schemas.values() {
            if let Some(name) = namespace
                .tables
                .iter()
                .chain(namespace.views.iter())
                .find(|(_, spec)| spec.is_base_event_row)
                .map(|(name, _)| name.as_str())
            {
                return Some(name);
            }
        }
        None
    }

    /// First 16 hex characters of SHA-256 over the canonical JSON, served at
    /// `/meta/schema.hash` and recorded in every query tag (§6).
    pub fn content_hash(canonical_json: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json.as_bytes());
        let digest = hasher.finalize();
        hex::encode(digest)[..16].to_string()
    }
}

/// Minimal hex encoder so the gateway doesn't need an extra dependency just
/// for formatting a digest.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchemaContract {
        let json = r#"{
            "database": "ANALYTICS",
            "schemas": {
                "PUBLIC": {
                    "tables": {},
                    "views": {
                        "events": {
                            "columns": [{"name": "EVENT_ID", "data_type": "STRING"}, {"name": "OCCURRED_AT", "data_type": "TIMESTAMP"}],
                            "is_base_event_row": true
                        }
                    }
                }
            },
            "allowed_aggregations": ["COUNT", "SUM"],
            "allowed_operators": ["=", ">"],
            "allowed_grains": ["DAY", "HOUR"],
            "security": {"max_rows_per_query": 10000},
            "activity_namespace": {"prefix": "mcp", "standard_activities": []}
        }"#;
        SchemaContract::parse(json).unwrap()
    }

    #[test]
    fn finds_source_case_insensitively() {
        let contract = sample();
        assert!(contract.find_source("EVENTS").is_some());
        assert!(contract.find_source("unknown").is_none());
    }

    #[test]
    fn base_event_source_finds_the_marked_view() {
        let contract = sample();
        assert_eq!(contract.base_event_source(), Some("events"));
    }

    #[test]
    fn source_reports_column_membership() {
        let contract = sample();
        let source = contract.find_source("events").unwrap();
        assert!(source.has_column("event_id"));
        assert!(!source.has_column("missing"));
    }

    #[test]
    fn content_hash_is_16_hex_chars() {
        let hash = SchemaContract::content_hash("{}");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
