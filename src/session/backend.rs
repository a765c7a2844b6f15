use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::db::connection::ConnectionConfig;
use crate::db::executor::QueryResult;
use crate::db::history_store::HistoryRecord;
use crate::db::introspect::SchemaDescription;

/// Failures the session shows to the user. The text is the server's short message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    Extraction(String),
    #[error("{0}")]
    SafetyRejection(String),
    #[error("{0}")]
    Execution(String),
    #[error("Could not reach the server: {0}")]
    Transport(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Api(String),
}

/// The network calls a session makes, one method per endpoint.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn connect_db(&self, config: &ConnectionConfig) -> Result<SchemaDescription, BackendError>;

    async fn text_to_sql(&self, text: &str, schema: &SchemaDescription) -> Result<String, BackendError>;

    async fn execute_query(
        &self,
        query: &str,
        text: &str,
        config: &ConnectionConfig,
    ) -> Result<QueryResult, BackendError>;

    async fn fetch_history(&self, token: &str) -> Result<Vec<HistoryRecord>, BackendError>;
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ConnectBody {
    schema: SchemaDescription,
}

#[derive(Deserialize)]
struct QueryBody {
    query: String,
}

#[derive(Deserialize)]
struct HistoryBody {
    history: Vec<HistoryRecord>,
}

#[derive(Serialize)]
struct TextToSqlBody<'a> {
    text: &'a str,
    schema: &'a SchemaDescription,
}

#[derive(Serialize)]
struct ExecuteBody<'a> {
    query: &'a str,
    text: &'a str,
    #[serde(rename = "dbConfig")]
    db_config: &'a ConnectionConfig,
}

/// Talks to a running `nl-sql serve` instance.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Sent with execute-query so the server files the run under this user.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.set_token(token);
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, (StatusCode, String)> {
        let response = request.send().await.map_err(|e| {
            error!("Request failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                error!("Unreadable response body: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            });
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .message
            .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()));
        debug!("Server answered {}: {}", status, message);
        Err((status, message))
    }
}

fn transport_or((status, message): (StatusCode, String), map: impl FnOnce(StatusCode, String) -> BackendError) -> BackendError {
    match status {
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => BackendError::Transport(message),
        _ => map(status, message),
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn connect_db(&self, config: &ConnectionConfig) -> Result<SchemaDescription, BackendError> {
        let request = self.client.post(self.url("connect-db")).json(config);
        self.send::<ConnectBody>(request)
            .await
            .map(|body| body.schema)
            .map_err(|e| transport_or(e, |_, message| BackendError::Connection(message)))
    }

    async fn text_to_sql(&self, text: &str, schema: &SchemaDescription) -> Result<String, BackendError> {
        let request = self
            .client
            .post(self.url("text-to-sql"))
            .json(&TextToSqlBody { text, schema });
        self.send::<QueryBody>(request)
            .await
            .map(|body| body.query)
            .map_err(|e| {
                transport_or(e, |status, message| {
                    if status == StatusCode::INTERNAL_SERVER_ERROR && message.starts_with("No valid SQL") {
                        BackendError::Extraction(message)
                    } else {
                        BackendError::Api(message)
                    }
                })
            })
    }

    async fn execute_query(
        &self,
        query: &str,
        text: &str,
        config: &ConnectionConfig,
    ) -> Result<QueryResult, BackendError> {
        let mut request = self.client.post(self.url("execute-query")).json(&ExecuteBody {
            query,
            text,
            db_config: config,
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        self.send::<QueryResult>(request).await.map_err(|e| {
            transport_or(e, |status, message| match status {
                StatusCode::FORBIDDEN => BackendError::SafetyRejection(message),
                StatusCode::BAD_REQUEST if message.contains("FROM") => BackendError::SafetyRejection(message),
                StatusCode::INTERNAL_SERVER_ERROR => BackendError::Execution(message),
                _ => BackendError::Api(message),
            })
        })
    }

    async fn fetch_history(&self, token: &str) -> Result<Vec<HistoryRecord>, BackendError> {
        let request = self.client.get(self.url("history")).bearer_auth(token);
        self.send::<HistoryBody>(request)
            .await
            .map(|body| body.history)
            .map_err(|e| {
                transport_or(e, |status, message| match status {
                    StatusCode::UNAUTHORIZED => BackendError::Auth(message),
                    _ => BackendError::Api(message),
                })
            })
    }
}
