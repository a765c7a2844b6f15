use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Executor, Row};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use super::connection::{close, ConnectionConfig};
use super::DbError;

/// Table name to ordered column names, used to ground SQL generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDescription(BTreeMap<String, Vec<String>>);

impl SchemaDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, columns: Vec<String>) {
        self.0.insert(table.into(), columns);
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(t, cols)| (t.as_str(), cols.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Into<String>> FromIterator<(T, Vec<String>)> for SchemaDescription {
    fn from_iter<I: IntoIterator<Item = (T, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(t, cols)| (t.into(), cols)).collect())
    }
}

/// Lists every table and its columns over one short-lived connection.
pub async fn introspect_schema(config: &ConnectionConfig) -> Result<SchemaDescription, DbError> {
    let mut conn = config.open().await?;
    let result = read_schema(&mut conn).await;
    close(conn).await;

    match &result {
        Ok(schema) => info!("Retrieved schema for {} ({} tables)", config.database, schema.len()),
        Err(e) => error!("Schema introspection failed for {}: {}", config.database, e),
    }
    result
}

async fn read_schema(conn: &mut MySqlConnection) -> Result<SchemaDescription, DbError> {
    let table_rows = conn
        .fetch_all(sqlx::raw_sql("SHOW TABLES"))
        .await
        .map_err(|e| DbError::Query(e.to_string()))?;

    let mut schema = SchemaDescription::new();
    for row in &table_rows {
        let table = text_column(row, 0)?;

        let sql = format!("SHOW COLUMNS FROM {}", quote_identifier(&table));
        let column_rows = (&mut *conn)
            .fetch_all(sqlx::raw_sql(&sql))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        // First column of SHOW COLUMNS is `Field`
        let columns = column_rows
            .iter()
            .map(|r| text_column(r, 0))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Table {} has columns {:?}", table, columns);
        schema.insert(table, columns);
    }

    Ok(schema)
}

/// Reads a name column that some server versions report as binary.
fn text_column(row: &MySqlRow, index: usize) -> Result<String, DbError> {
    if let Ok(text) = row.try_get::<String, _>(index) {
        return Ok(text);
    }
    row.try_get_unchecked::<Vec<u8>, _>(index)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| DbError::Query(e.to_string()))
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_backquoted() {
        assert_eq!(quote_identifier("users"), "`users`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn serializes_as_plain_object() {
        let schema: SchemaDescription = [
            ("teachers", vec!["id".to_string(), "name".to_string()]),
            ("classes", vec!["id".to_string()]),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"teachers": ["id", "name"], "classes": ["id"]})
        );

        let back: SchemaDescription = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
        let tables: Vec<&str> = back.tables().map(|(t, _)| t).collect();
        assert_eq!(tables, vec!["classes", "teachers"]);
    }
}
