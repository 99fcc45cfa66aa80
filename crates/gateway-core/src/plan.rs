//! The structured query plan (§4.4) and its closed vocabularies.
//!
//! A [`Plan`] is the only shape a user request can take once it reaches the
//! compiler/validator/executor pipeline (C4–C6). Every enum here is a closed
//! set; there is no escape hatch to free-form SQL fragments, keeping the
//! "Allowed aggregation list" open question (§9) resolved in favor of a
//! single symbolic normal form rather than SQL-fragment strings.

use serde::{Deserialize, Serialize};

/// System-wide maximum for `top_n` absent an explicit envelope cap (§4.4).
pub const SYSTEM_MAX_ROWS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Aggregation {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    pub fn as_sql_fn(&self) -> &'static str {
        match self {
            Aggregation::Count => "COUNT",
            Aggregation::CountDistinct => "COUNT",
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }

    pub fn is_distinct(&self) -> bool {
        matches!(self, Aggregation::CountDistinct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "BETWEEN")]
    Between,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Neq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::Between => "BETWEEN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grain {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Grain {
    pub fn as_sql_unit(&self) -> &'static str {
        match self {
            Grain::Minute => "MINUTE",
            Grain::Hour => "HOUR",
            Grain::Day => "DAY",
            Grain::Week => "WEEK",
            Grain::Month => "MONTH",
            Grain::Quarter => "QUARTER",
            Grain::Year => "YEAR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    #[serde(rename = "fn")]
    pub function: Aggregation,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: Operator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// The structured, declarative plan a request compiles down to.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    pub source: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub grain: Option<Grain>,
    pub top_n: Option<i64>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_distinct_is_marked_distinct() {
        assert!(Aggregation::CountDistinct.is_distinct());
        assert!(!Aggregation::Count.is_distinct());
    }

    #[test]
    fn plan_defaults_to_empty_collections() {
        let plan: Plan = serde_json::from_value(serde_json::json!({"source": "events"})).unwrap();
        assert_eq!(plan.source, "events");
        assert!(plan.dimensions.is_empty());
        assert!(plan.measures.is_empty());
        assert!(plan.top_n.is_none());
    }
}
