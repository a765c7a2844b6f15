use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use duckdb::{params, Connection};
use r2d2::Pool;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::HistoryConfig;
use crate::db::db_pool::DuckDBConnectionManager;

const INIT_SQL: &str = "
    CREATE SEQUENCE IF NOT EXISTS query_history_id_seq START 1;
    CREATE TABLE IF NOT EXISTS query_history (
        id BIGINT NOT NULL,
        user_id VARCHAR NOT NULL,
        question VARCHAR,
        query VARCHAR NOT NULL,
        created_at VARCHAR NOT NULL,
        is_bookmarked BOOLEAN NOT NULL DEFAULT false
    );
";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("history database error: {0}")]
    Database(#[from] duckdb::Error),
    #[error("history task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("corrupt history timestamp '{0}'")]
    Timestamp(String),
}

/// One executed query as stored for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub is_bookmarked: bool,
}

type RawRecord = (i64, Option<String>, String, String, bool);

impl TryFrom<RawRecord> for HistoryRecord {
    type Error = HistoryError;

    fn try_from((id, question, query, created_at, is_bookmarked): RawRecord) -> Result<Self, Self::Error> {
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| HistoryError::Timestamp(created_at.clone()))?
            .with_timezone(&Utc);
        Ok(Self {
            id,
            question,
            query,
            created_at,
            is_bookmarked,
        })
    }
}

/// Per-user query history kept in an embedded DuckDB file.
#[derive(Clone)]
pub struct HistoryStore {
    pool: Pool<DuckDBConnectionManager>,
}

impl HistoryStore {
    pub fn open(config: &HistoryConfig) -> Result<Self, HistoryError> {
        info!("Opening history store at {}", config.connection_string);
        let manager = DuckDBConnectionManager::new(&config.connection_string)?;
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1) as u32)
            .build(manager)?;

        pool.get()?.execute_batch(INIT_SQL)?;
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, HistoryError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }

    pub async fn record(
        &self,
        user_id: &str,
        question: Option<&str>,
        query: &str,
    ) -> Result<HistoryRecord, HistoryError> {
        let user_id = user_id.to_string();
        let question = question.map(str::to_string);
        let query = query.to_string();
        let created_at = Utc::now().trunc_subsecs(3);
        let stamp = created_at.to_rfc3339_opts(SecondsFormat::Millis, true);

        let id = self
            .with_conn({
                let question = question.clone();
                let query = query.clone();
                move |conn| {
                    let id: i64 = conn.query_row("SELECT nextval('query_history_id_seq')", [], |row| row.get(0))?;
                    conn.execute(
                        "INSERT INTO query_history (id, user_id, question, query, created_at, is_bookmarked)
                         VALUES (?, ?, ?, ?, ?, false)",
                        params![id, user_id, question, query, stamp],
                    )?;
                    Ok(id)
                }
            })
            .await?;

        debug!("Recorded history row {}", id);
        Ok(HistoryRecord {
            id,
            question,
            query,
            created_at,
            is_bookmarked: false,
        })
    }

    /// Newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<HistoryRecord>, HistoryError> {
        let user_id = user_id.to_string();
        let raw = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, question, query, created_at, is_bookmarked
                     FROM query_history
                     WHERE user_id = ?
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt
                    .query_map(params![user_id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })?
                    .collect::<Result<Vec<RawRecord>, _>>()?;
                Ok(rows)
            })
            .await?;

        raw.into_iter().map(HistoryRecord::try_from).collect()
    }

    /// Returns `None` when no row with this id belongs to the user.
    pub async fn set_bookmark(
        &self,
        user_id: &str,
        id: i64,
        is_bookmarked: bool,
    ) -> Result<Option<HistoryRecord>, HistoryError> {
        let user_id = user_id.to_string();
        let raw = self
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE query_history SET is_bookmarked = ? WHERE id = ? AND user_id = ?",
                    params![is_bookmarked, id, user_id],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let row: RawRecord = conn.query_row(
                    "SELECT id, question, query, created_at, is_bookmarked FROM query_history WHERE id = ?",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?;
                Ok(Some(row))
            })
            .await?;

        raw.map(HistoryRecord::try_from).transpose()
    }
}
