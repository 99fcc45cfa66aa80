//! Single-statement assertion and the DDL allow/deny list (§4.8 steps 2–3).
//! Forbidden DDL never reaches the warehouse.

use gateway_core::{GatewayError, GatewayResult};

/// Object kinds the allow-list permits (views, procedures, functions; §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlObjectKind {
    View,
    Procedure,
    Function,
}

impl DdlObjectKind {
    fn keyword(&self) -> &'static str {
        match self {
            DdlObjectKind::View => "VIEW",
            DdlObjectKind::Procedure => "PROCEDURE",
            DdlObjectKind::Function => "FUNCTION",
        }
    }
}

const DENY_LIST: [&str; 5] = ["TRUNCATE", "ALTER ACCOUNT", "DROP TABLE", "DROP DATABASE", "DROP SCHEMA"];

/// Splits `content` into exactly one DDL statement (§4.8 step 2), tracking
/// `$$...$$` dollar-quoted bodies so semicolons inside a procedure body are
/// not mistaken for statement separators.
pub fn assert_single_statement(content: &str) -> GatewayResult<String> {
    let trimmed = content.trim();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_dollar_quote = false;
    let mut chars = trimmed.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'$') {
            chars.next();
            current.push_str("$$");
            in_dollar_quote = !in_dollar_quote;
            continue;
        }
        if c == ';' && !in_dollar_quote {
            let stmt = current.trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
            continue;
        }
        current.push(c);
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        statements.push(tail);
    }

    match statements.len() {
        1 => Ok(statements.remove(0)),
        count => Err(GatewayError::MultipleStatements { count }),
    }
}

/// Enforces the allow-list (`CREATE OR REPLACE` / `CREATE IF NOT EXISTS` for
/// views, procedures, functions) and the deny-list (§4.8 step 3). Returns
/// the object kind and name on success.
pub fn classify_and_check(statement: &str) -> GatewayResult<(DdlObjectKind, String)> {
    let upper = statement.to_uppercase();

    for forbidden in DENY_LIST {
        if upper.contains(forbidden) {
            return Err(GatewayError::ForbiddenOperation { statement_kind: forbidden.to_string() });
        }
    }

    let allowed_prefixes = ["CREATE OR REPLACE", "CREATE IF NOT EXISTS"];
    let Some(prefix) = allowed_prefixes.iter().find(|p| upper.starts_with(*p)) else {
        return Err(GatewayError::ForbiddenOperation { statement_kind: "unrecognized DDL prefix".to_string() });
    };

    let remainder = upper[prefix.len()..].trim_start();
    let kind = [DdlObjectKind::View, DdlObjectKind::Procedure, DdlObjectKind::Function]
        .into_iter()
        .find(|k| remainder.starts_with(k.keyword()))
        .ok_or_else(|| GatewayError::ForbiddenOperation { statement_kind: "unsupported object type".to_string() })?;

    let after_keyword = remainder[kind.keyword().len()..].trim_start();
    let name = after_keyword
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::Syntax { message: "could not parse object name".into() })?
        .to_string();

    Ok((kind, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_multiple_statements() {
        let err = assert_single_statement("CREATE OR REPLACE VIEW a AS SELECT 1; DROP TABLE b;").unwrap_err();
        assert!(matches!(err, GatewayError::MultipleStatements { count: 2 }));
    }

    #[test]
    fn dollar_quoted_semicolons_do_not_split_a_procedure_body() {
        let ddl = "CREATE OR REPLACE PROCEDURE p() AS $$ BEGIN x := 1; RETURN x; END $$";
        let stmt = assert_single_statement(ddl).unwrap();
        assert!(stmt.contains("RETURN x"));
    }

    #[test]
    fn deny_list_rejects_truncate() {
        let err = classify_and_check("TRUNCATE TABLE events").unwrap_err();
        assert!(matches!(err, GatewayError::ForbiddenOperation { .. }));
    }

    #[test]
    fn allow_list_accepts_create_or_replace_view() {
        let (kind, name) = classify_and_check("CREATE OR REPLACE VIEW my_view AS SELECT 1").unwrap();
        assert_eq!(kind, DdlObjectKind::View);
        assert_eq!(name, "MY_VIEW");
    }

    #[test]
    fn rejects_drop_table_even_without_other_deny_terms() {
        let err = classify_and_check("DROP TABLE events").unwrap_err();
        assert!(matches!(err, GatewayError::ForbiddenOperation { .. }));
    }
}
