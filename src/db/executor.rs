use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::time::Instant;
use tracing::{error, info};

use super::connection::{close, ConnectionConfig};
use super::DbError;

/// Materialized result of one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub fields: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// Runs one statement over a fresh connection and collects every row.
pub async fn execute_statement(config: &ConnectionConfig, statement: &str) -> Result<QueryResult, DbError> {
    let statement = single_statement(statement)?;

    let start_time = Instant::now();
    let mut conn = config.open().await?;
    let result = run(&mut conn, statement).await;
    close(conn).await;

    match &result {
        Ok(r) => info!(
            "Query executed successfully. Row count: {}, Execution time: {}ms",
            r.rows.len(),
            start_time.elapsed().as_millis()
        ),
        Err(e) => error!("Query execution error: {}", e),
    }
    result
}

/// Strips trailing semicolons and rejects bodies that hold more than one statement.
///
/// Semicolons inside quoted strings and identifiers do not count.
pub fn single_statement(statement: &str) -> Result<&str, DbError> {
    let trimmed = statement.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in trimmed.chars() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(q) if c == '\\' && q != '`' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') => quote = Some(c),
            None if c == ';' => {
                return Err(DbError::Query(
                    "Only one SQL statement can be executed at a time.".to_string(),
                ))
            }
            None => {}
        }
    }

    if trimmed.is_empty() {
        return Err(DbError::Query("Query was empty.".to_string()));
    }
    Ok(trimmed)
}

async fn run(conn: &mut MySqlConnection, statement: &str) -> Result<QueryResult, DbError> {
    // Prepared statements carry column metadata even when no rows come back
    let prepared = (&mut *conn)
        .prepare(statement)
        .await
        .map_err(|e| DbError::Query(e.to_string()))?;
    let fields: Vec<String> = prepared.columns().iter().map(|c| c.name().to_string()).collect();

    let rows = prepared
        .query()
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DbError::Query(e.to_string()))?;

    let rows = rows
        .iter()
        .map(|row| {
            fields
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), json_value(row, i)))
                .collect::<Map<_, _>>()
        })
        .collect();

    Ok(QueryResult { fields, rows })
}

/// Converts one cell to JSON. DECIMAL, text and anything unrecognised fall back to a string.
fn json_value(row: &MySqlRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }

    let type_name = row.columns()[index].type_info().name().to_uppercase();
    let type_str = type_name.as_str();

    if type_str == "BOOLEAN" {
        if let Ok(v) = row.try_get::<bool, _>(index) {
            return Value::Bool(v);
        }
    }

    // Binary-protocol integers decode by width, so the unchecked getters cover every size
    if type_str.ends_with("UNSIGNED") && is_integer(type_str.trim_end_matches(" UNSIGNED")) {
        if let Ok(v) = row.try_get_unchecked::<u64, _>(index) {
            return Value::Number(v.into());
        }
    } else if is_integer(type_str) {
        if let Ok(v) = row.try_get_unchecked::<i64, _>(index) {
            return Value::Number(v.into());
        }
    }

    match type_str {
        "FLOAT" | "DOUBLE" => {
            let v = row
                .try_get::<f64, _>(index)
                .or_else(|_| row.try_get::<f32, _>(index).map(f64::from));
            if let Some(n) = v.ok().and_then(serde_json::Number::from_f64) {
                return Value::Number(n);
            }
        }
        "DATE" => {
            if let Ok(v) = row.try_get::<NaiveDate, _>(index) {
                return Value::String(v.to_string());
            }
        }
        "DATETIME" => {
            if let Ok(v) = row.try_get::<NaiveDateTime, _>(index) {
                return Value::String(v.format("%Y-%m-%dT%H:%M:%S%.3f").to_string());
            }
        }
        "TIMESTAMP" => {
            if let Ok(v) = row.try_get::<DateTime<Utc>, _>(index) {
                return Value::String(v.to_rfc3339_opts(SecondsFormat::Millis, true));
            }
        }
        "TIME" => {
            if let Ok(v) = row.try_get::<NaiveTime, _>(index) {
                return Value::String(v.to_string());
            }
        }
        _ => {}
    }

    match row.try_get_unchecked::<String, _>(index) {
        Ok(text) if type_str == "JSON" => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Ok(text) => Value::String(text),
        Err(_) => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
    }
}

fn is_integer(type_str: &str) -> bool {
    matches!(type_str, "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_type_names() {
        assert!(is_integer("BIGINT"));
        assert!(is_integer("TINYINT"));
        assert!(!is_integer("DECIMAL"));
        assert!(!is_integer("VARCHAR"));
    }

    #[test]
    fn result_wire_shape() {
        let mut row = Map::new();
        row.insert("id".to_string(), json!(1));
        row.insert("name".to_string(), json!("Bob"));
        let result = QueryResult {
            fields: vec!["id".to_string(), "name".to_string()],
            rows: vec![row],
        };

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"fields": ["id", "name"], "rows": [{"id": 1, "name": "Bob"}]})
        );

        let empty = QueryResult {
            fields: vec!["id".to_string(), "name".to_string()],
            rows: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(&empty).unwrap(),
            json!({"fields": ["id", "name"], "rows": []})
        );
    }

    #[test]
    fn trailing_semicolons_are_stripped() {
        assert_eq!(single_statement("SELECT * FROM t;").unwrap(), "SELECT * FROM t");
        assert_eq!(single_statement("  SELECT * FROM t ; ;\n").unwrap(), "SELECT * FROM t");
        assert_eq!(
            single_statement("SELECT ';' AS semi, `a;b` FROM t WHERE note = 'it\\'s;';").unwrap(),
            "SELECT ';' AS semi, `a;b` FROM t WHERE note = 'it\\'s;'"
        );
    }

    #[test]
    fn stacked_statements_are_rejected() {
        for body in [
            "SELECT id FROM a; SELECT name, email FROM b",
            "SELECT 1 FROM dual; GRANT ALL ON *.* TO 'x'@'%';",
            "SELECT 'a' FROM t;\nUPDATE t SET x = 1",
        ] {
            assert!(matches!(single_statement(body), Err(DbError::Query(_))), "{}", body);
        }
        assert!(matches!(single_statement(" ; "), Err(DbError::Query(_))));
    }

    #[tokio::test]
    async fn stacked_statements_fail_before_connecting() {
        let unreachable = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: Some(1),
            user: "root".to_string(),
            password: String::new(),
            database: "school".to_string(),
        };

        let err = execute_statement(&unreachable, "SELECT id FROM a; SELECT name FROM b")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Query(ref m) if m.contains("one SQL statement")), "{}", err);

        let err = execute_statement(&unreachable, "SELECT id FROM a;").await.unwrap_err();
        assert!(matches!(err, DbError::Connection(_)), "{}", err);
    }
}
