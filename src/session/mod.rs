//! Client-side state for one user working against one database.
//!
//! A `Session` owns the active connection, the current question, the SQL
//! generated for it, the latest results and a short local history. Every
//! mutation goes through `&mut self`, so a second cycle cannot start while
//! one is in flight.

pub mod backend;
pub mod speech;
pub mod storage;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::db::connection::ConnectionConfig;
use crate::db::executor::QueryResult;
use crate::db::introspect::SchemaDescription;
use crate::llm::models::GeneratedQuery;

use self::backend::{BackendError, QueryBackend};
use self::storage::{SavedProfile, SessionStore};

/// Most entries kept in local history.
pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    ProcessingPrompt,
    Generated,
    Ready,
    Failed,
}

impl SessionStatus {
    /// True for the whole generate-and-execute cycle.
    pub fn is_loading(self) -> bool {
        matches!(self, SessionStatus::ProcessingPrompt | SessionStatus::Generated)
    }

    /// True only while SQL is being generated.
    pub fn is_processing(self) -> bool {
        self == SessionStatus::ProcessingPrompt
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub text: String,
    pub sql_query: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<QueryResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No history entry with id {0}")]
    UnknownHistoryEntry(String),
}

/// The database the session talks to, with its schema as of connect time.
#[derive(Debug, Clone)]
pub struct ActiveConnection {
    pub config: ConnectionConfig,
    pub schema: SchemaDescription,
}

pub struct Session<B, S> {
    backend: B,
    store: S,
    connection: Option<ActiveConnection>,
    saved_profile: Option<SavedProfile>,
    current_text: String,
    generated: Option<GeneratedQuery>,
    results: Option<QueryResult>,
    error: Option<String>,
    history: Vec<HistoryEntry>,
    status: watch::Sender<SessionStatus>,
}

impl<B: QueryBackend, S: SessionStore> Session<B, S> {
    /// Restores the saved profile and history. Unreadable entries are skipped.
    pub fn new(backend: B, store: S) -> Self {
        let saved_profile = store.load_profile().unwrap_or_else(|e| {
            warn!("Ignoring saved connection profile: {}", e);
            None
        });
        let mut history = store.load_history().unwrap_or_else(|e| {
            warn!("Ignoring saved query history: {}", e);
            Vec::new()
        });
        history.truncate(HISTORY_LIMIT);

        let (status, _) = watch::channel(SessionStatus::Idle);
        Self {
            backend,
            store,
            connection: None,
            saved_profile,
            current_text: String::new(),
            generated: None,
            results: None,
            error: None,
            history,
            status,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Receives every status change from now on.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn current_text(&self) -> &str {
        &self.current_text
    }

    pub fn sql_query(&self) -> Option<&str> {
        self.generated.as_ref().map(|g| g.sql.as_str())
    }

    pub fn results(&self) -> Option<&QueryResult> {
        self.results.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn connection(&self) -> Option<&ActiveConnection> {
        self.connection.as_ref()
    }

    pub fn saved_profile(&self) -> Option<&SavedProfile> {
        self.saved_profile.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Replaces the question text, e.g. from dictation. Results are left alone.
    pub fn set_current_text(&mut self, text: impl Into<String>) {
        self.current_text = text.into();
    }

    /// Runs one question through generation and execution.
    pub async fn process_query(&mut self, text: &str) -> SessionStatus {
        if text.trim().is_empty() {
            return self.status();
        }

        self.current_text = text.to_string();
        self.generated = None;
        self.results = None;
        self.error = None;

        let Some(active) = self.connection.clone() else {
            return self.fail("No database connected".to_string());
        };

        self.set_status(SessionStatus::ProcessingPrompt);
        let sql = match self.backend.text_to_sql(text, &active.schema).await {
            Ok(sql) => sql,
            Err(e) => return self.fail(e.to_string()),
        };

        info!("Generated SQL: {}", sql);
        self.generated = Some(GeneratedQuery {
            question: text.to_string(),
            sql: sql.clone(),
        });
        self.set_status(SessionStatus::Generated);

        let results = match self.backend.execute_query(&sql, text, &active.config).await {
            Ok(results) => results,
            Err(e) => return self.fail(e.to_string()),
        };

        self.results = Some(results.clone());
        self.push_history(HistoryEntry {
            id: String::new(),
            text: text.to_string(),
            sql_query: sql,
            timestamp: Utc::now().timestamp_millis(),
            results: Some(results),
        });
        self.set_status(SessionStatus::Ready)
    }

    /// Restores a past cycle from local history without touching the network.
    pub fn select_history_entry(&mut self, id: &str) -> Result<(), SessionError> {
        let entry = self
            .history
            .iter()
            .find(|h| h.id == id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownHistoryEntry(id.to_string()))?;

        self.current_text = entry.text.clone();
        self.generated = Some(GeneratedQuery {
            question: entry.text,
            sql: entry.sql_query,
        });
        self.results = entry.results;
        self.error = None;
        self.set_status(SessionStatus::Ready);
        Ok(())
    }

    /// Drops the current question, SQL, results and error.
    pub fn clear_current(&mut self) {
        self.current_text.clear();
        self.generated = None;
        self.results = None;
        self.error = None;
        self.set_status(SessionStatus::Idle);
    }

    /// Introspects the database and makes it the active connection.
    ///
    /// The profile is saved without the password.
    pub async fn connect(&mut self, config: &ConnectionConfig) -> Result<SchemaDescription, BackendError> {
        let schema = self
            .backend
            .connect_db(config)
            .await
            .inspect_err(|e| warn!("Connect to {:?} failed: {}", config, e))?;
        info!(
            "Connected to {}@{}/{} ({} tables)",
            config.user,
            config.host,
            config.database,
            schema.len()
        );

        let profile = SavedProfile::from_connection(config, &schema);
        if let Err(e) = self.store.save_profile(&profile) {
            warn!("Could not save connection profile: {}", e);
        }
        self.saved_profile = Some(profile);
        self.connection = Some(ActiveConnection {
            config: config.clone(),
            schema: schema.clone(),
        });
        Ok(schema)
    }

    /// Checks that the database is reachable without switching to it.
    pub async fn test_connection(&mut self, config: &ConnectionConfig) -> Result<(), BackendError> {
        self.backend.connect_db(config).await.map(|_| ())
    }

    /// Replaces local history with the server's records for this token.
    pub async fn sync_history(&mut self, token: &str) -> Result<usize, BackendError> {
        let records = self.backend.fetch_history(token).await?;
        self.history = records
            .into_iter()
            .take(HISTORY_LIMIT)
            .map(|r| HistoryEntry {
                id: r.id.to_string(),
                text: r.question.unwrap_or_else(|| r.query.clone()),
                sql_query: r.query,
                timestamp: r.created_at.timestamp_millis(),
                results: None,
            })
            .collect();
        self.persist_history();
        Ok(self.history.len())
    }

    fn push_history(&mut self, mut entry: HistoryEntry) {
        // Ids are creation millis, bumped past the newest entry so they stay unique.
        let newest = self
            .history
            .first()
            .and_then(|h| h.id.parse::<i64>().ok())
            .unwrap_or(i64::MIN);
        entry.id = entry.timestamp.max(newest.saturating_add(1)).to_string();

        self.history.insert(0, entry);
        self.history.truncate(HISTORY_LIMIT);
        self.persist_history();
    }

    fn persist_history(&mut self) {
        if let Err(e) = self.store.save_history(&self.history) {
            warn!("Could not save query history: {}", e);
        }
    }

    fn fail(&mut self, message: String) -> SessionStatus {
        warn!("Query failed: {}", message);
        self.error = Some(message);
        self.set_status(SessionStatus::Failed)
    }

    fn set_status(&self, status: SessionStatus) -> SessionStatus {
        self.status.send_replace(status);
        status
    }
}
