//! Role templates: the fixed set of privilege bundles an issued token can
//! carry (§4.3 envelope fields). The system does not support ad-hoc
//! per-token privilege sets — every token's envelope comes from exactly one
//! of these templates at issuance time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleTemplate {
    /// Read-only dashboard consumer: query + activity tools only.
    Standard,
    /// Can additionally create dashboards/schedules.
    Analyst,
    /// Full surface including the deployment gateway.
    Admin,
}

impl RoleTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            RoleTemplate::Standard => "standard",
            RoleTemplate::Analyst => "analyst",
            RoleTemplate::Admin => "admin",
        }
    }

    pub fn allowed_tools(&self) -> Vec<String> {
        let tools: &[&str] = match self {
            RoleTemplate::Standard => &["query", "activity"],
            RoleTemplate::Analyst => &["query", "activity", "dashboard.create", "dashboard.schedule"],
            RoleTemplate::Admin => &["query", "activity", "dashboard.create", "dashboard.schedule", "dev.deploy", "dev.claim"],
        };
        tools.iter().map(|s| s.to_string()).collect()
    }

    pub fn max_rows(&self) -> i64 {
        match self {
            RoleTemplate::Standard => 10_000,
            RoleTemplate::Analyst => 50_000,
            RoleTemplate::Admin => 100_000,
        }
    }

    pub fn daily_runtime_seconds(&self) -> i64 {
        match self {
            RoleTemplate::Standard => 1_800,
            RoleTemplate::Analyst => 3_600,
            RoleTemplate::Admin => 7_200,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(RoleTemplate::Standard),
            "analyst" => Some(RoleTemplate::Analyst),
            "admin" => Some(RoleTemplate::Admin),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        for template in [RoleTemplate::Standard, RoleTemplate::Analyst, RoleTemplate::Admin] {
            assert_eq!(RoleTemplate::from_name(template.name()), Some(template));
        }
    }

    #[test]
    fn admin_has_the_widest_tool_set() {
        assert!(RoleTemplate::Admin.allowed_tools().len() >= RoleTemplate::Standard.allowed_tools().len());
    }
}
