//! # Safe-Query Compiler (C4)
//!
//! Turns a structured [`Plan`] into a parameterized SQL template. Every
//! identifier that reaches the output is checked against the schema
//! contract first; there is no path from user input to a SQL string other
//! than through this module (§4.4).

use gateway_core::plan::{Grain, Operator, Plan};
use gateway_core::schema_contract::SchemaContract;
use gateway_core::{GatewayError, GatewayResult, SYSTEM_MAX_ROWS};

/// `{ sql_template, binds[], plan (normalized) }` — the compiler's output
/// (§4.4). `sql_template` never contains an interpolated literal; every
/// value lives in `binds`, in the order its `?` placeholder appears.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql_template: String,
    pub binds: Vec<serde_json::Value>,
    pub plan: Plan,
}

const TIME_COLUMN_CANDIDATES: [&str; 2] = ["HOUR", "TS"];

/// Compiles `plan` against `contract`, upper-casing and whitelisting every
/// identifier along the way. Applies the contract's row cap as a default
/// `LIMIT` when the plan omits `top_n` (§4.4).
pub fn compile(plan: &Plan, contract: &SchemaContract) -> GatewayResult<CompiledQuery> {
    let source = contract.find_source(&plan.source).ok_or_else(|| GatewayError::UnknownSource {
        source: plan.source.clone(),
    })?;

    let policy_max = contract.security.max_rows_per_query.min(SYSTEM_MAX_ROWS);

    let mut select_parts = Vec::new();
    for dimension in &plan.dimensions {
        if !source.has_column(dimension) {
            return Err(GatewayError::InvalidColumn {
                source: plan.source.clone(),
                column: dimension.clone(),
            });
        }
        select_parts.push(dimension.to_uppercase());
    }

    for measure in &plan.measures {
        let fn_name = measure.function.as_sql_fn();
        if !contract.allowed_aggregations.iter().any(|a| a.eq_ignore_ascii_case(fn_name)) {
            return Err(GatewayError::InvalidAggregation { function: fn_name.to_string() });
        }
        if measure.column != "*" && !source.has_column(&measure.column) {
            return Err(GatewayError::InvalidColumn {
                source: plan.source.clone(),
                column: measure.column.clone(),
            });
        }
        let distinct = if measure.function.is_distinct() { "DISTINCT " } else { "" };
        let column = if measure.column == "*" { "*".to_string() } else { measure.column.to_uppercase() };
        select_parts.push(format!("{fn_name}({distinct}{column})"));
    }

    if select_parts.is_empty() {
        select_parts.push("*".to_string());
    }

    let mut where_parts = Vec::new();
    let mut binds = Vec::new();
    for filter in &plan.filters {
        let op_sql = filter.operator.as_sql();
        if !contract.allowed_operators.iter().any(|o| o == op_sql) {
            return Err(GatewayError::InvalidOperator { operator: op_sql.to_string() });
        }
        if !source.has_column(&filter.column) {
            return Err(GatewayError::InvalidColumn {
                source: plan.source.clone(),
                column: filter.column.clone(),
            });
        }
        let placeholder = match filter.operator {
            Operator::Between => "? AND ?",
            Operator::In | Operator::NotIn => "(?)",
            _ => "?",
        };
        where_parts.push(format!("{} {op_sql} {placeholder}", filter.column.to_uppercase()));
        binds.push(filter.value.clone());
    }

    let mut group_by = plan.dimensions.iter().map(|d| d.to_uppercase()).collect::<Vec<_>>();

    if let Some(grain) = plan.grain {
        let grain_str = grain_as_contract_str(grain);
        if !contract.allowed_grains.iter().any(|g| g.eq_ignore_ascii_case(&grain_str)) {
            return Err(GatewayError::InvalidGrain { grain: grain_str });
        }
        let time_column = TIME_COLUMN_CANDIDATES
            .iter()
            .find(|candidate| source.has_column(candidate))
            .ok_or_else(|| GatewayError::InvalidGrain { grain: grain_str.clone() })?;
        let bucket_expr = format!("DATE_TRUNC('{}', {})", grain.as_sql_unit(), time_column);
        select_parts.insert(0, format!("{bucket_expr} AS BUCKET"));
        group_by.insert(0, "BUCKET".to_string());
    }

    let top_n = match plan.top_n {
        Some(n) if n < 1 || n > policy_max => {
            return Err(GatewayError::RowLimitExceedsPolicy { requested: n, policy_max });
        }
        Some(n) => n,
        None => policy_max,
    };

    let mut sql = format!("SELECT {} FROM {}", select_parts.join(", "), plan.source.to_uppercase());
    if !where_parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_parts.join(" AND "));
    }
    if !group_by.is_empty() && !plan.measures.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by.join(", "));
    }
    if !plan.order_by.is_empty() {
        let mut order_parts = Vec::with_capacity(plan.order_by.len());
        for order in &plan.order_by {
            let direction = if matches!(order.direction, gateway_core::plan::SortDirection::Desc) { "DESC" } else { "ASC" };
            let expr = if let Some(measure) = plan.measures.iter().find(|m| m.column == order.column) {
                let fn_name = measure.function.as_sql_fn();
                let distinct = if measure.function.is_distinct() { "DISTINCT " } else { "" };
                let column = if measure.column == "*" { "*".to_string() } else { measure.column.to_uppercase() };
                format!("{fn_name}({distinct}{column})")
            } else if source.has_column(&order.column) {
                order.column.to_uppercase()
            } else {
                return Err(GatewayError::InvalidColumn {
                    source: plan.source.clone(),
                    column: order.column.clone(),
                });
            };
            order_parts.push(format!("{expr} {direction}"));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_parts.join(", "));
    }
    sql.push_str(" LIMIT ?");
    binds.push(serde_json::json!(top_n));

    let mut normalized = plan.clone();
    normalized.top_n = Some(top_n);

    Ok(CompiledQuery { sql_template: sql, binds, plan: normalized })
}

fn grain_as_contract_str(grain: Grain) -> String {
    grain.as_sql_unit().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::plan::{Filter, Measure};

    fn contract() -> SchemaContract {
        SchemaContract::parse(
            r#"{
            "database": "ANALYTICS",
            "schemas": {"PUBLIC": {"tables": {}, "views": {
                "events": {"columns": [
                    {"name": "EVENT_ID", "data_type": "STRING"},
                    {"name": "HOUR", "data_type": "TIMESTAMP"},
                    {"name": "ACTOR", "data_type": "STRING"}
                ], "is_base_event_row": true}
            }}},
            "allowed_aggregations": ["COUNT", "SUM"],
            "allowed_operators": ["=", ">"],
            "allowed_grains": ["DAY", "HOUR"],
            "security": {"max_rows_per_query": 10000},
            "activity_namespace": {"prefix": "mcp", "standard_activities": []}
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn unknown_source_is_rejected() {
        let plan = Plan { source: "missing".into(), ..Default::default() };
        let err = compile(&plan, &contract()).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownSource { .. }));
    }

    #[test]
    fn invalid_column_in_filter_is_rejected() {
        let plan = Plan {
            source: "events".into(),
            filters: vec![Filter { column: "nope".into(), operator: Operator::Eq, value: serde_json::json!(1) }],
            ..Default::default()
        };
        let err = compile(&plan, &contract()).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidColumn { .. }));
    }

    #[test]
    fn default_limit_applies_when_top_n_omitted() {
        let plan = Plan { source: "events".into(), ..Default::default() };
        let compiled = compile(&plan, &contract()).unwrap();
        assert_eq!(compiled.plan.top_n, Some(10_000));
        assert!(compiled.sql_template.contains("LIMIT ?"));
    }

    #[test]
    fn values_never_appear_as_literals_in_the_sql_template() {
        let plan = Plan {
            source: "events".into(),
            filters: vec![Filter {
                column: "actor".into(),
                operator: Operator::Eq,
                value: serde_json::json!("bobby_tables"),
            }],
            ..Default::default()
        };
        let compiled = compile(&plan, &contract()).unwrap();
        assert!(!compiled.sql_template.contains("bobby_tables"));
        assert!(compiled.binds.contains(&serde_json::json!("bobby_tables")));
    }

    #[test]
    fn measure_column_must_exist_unless_wildcard() {
        let plan = Plan {
            source: "events".into(),
            measures: vec![Measure { function: gateway_core::plan::Aggregation::Count, column: "*".into() }],
            ..Default::default()
        };
        assert!(compile(&plan, &contract()).is_ok());
    }
}
