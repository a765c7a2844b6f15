use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::connection::ConnectionConfig;
use crate::db::executor::{execute_statement, QueryResult};
use crate::db::history_store::HistoryRecord;
use crate::db::introspect::{introspect_schema, SchemaDescription};
use crate::llm::LlmError;
use crate::safety::check_statement;
use crate::web::auth::AuthUser;
use crate::web::error::{ApiError, ApiJson};
use crate::web::state::AppState;

// Connection types

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub message: String,
    pub schema: SchemaDescription,
}

// Generation types

#[derive(Debug, Deserialize)]
pub struct TextToSqlRequest {
    pub text: Option<String>,
    pub schema: Option<SchemaDescription>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TextToSqlResponse {
    pub query: String,
}

// Execution types

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryRequest {
    pub query: Option<String>,
    #[serde(rename = "dbConfig")]
    pub db_config: Option<ConnectionConfig>,
    /// Natural-language source, stored alongside the SQL in history.
    #[serde(default)]
    pub text: Option<String>,
}

// History types

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryRecord>,
}

#[derive(Debug, Deserialize)]
pub struct BookmarkRequest {
    pub is_bookmarked: bool,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub llm_backend: String,
    pub llm_model: String,
}

// API Implementations

pub async fn connect_db(ApiJson(config): ApiJson<ConnectionConfig>) -> Result<Json<ConnectResponse>, ApiError> {
    let schema = introspect_schema(&config).await.map_err(|e| {
        error!("Connection failed: {}", e);
        ApiError::internal("Connection failed").with_detail(e)
    })?;

    Ok(Json(ConnectResponse {
        message: "Connected and schema retrieved".to_string(),
        schema,
    }))
}

pub async fn text_to_sql(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<TextToSqlRequest>,
) -> Result<Json<TextToSqlResponse>, ApiError> {
    let (text, schema) = match (payload.text, payload.schema) {
        (Some(text), Some(schema)) if !text.is_empty() => (text, schema),
        _ => return Err(ApiError::bad_request("Text and schema are required")),
    };

    let generated = state
        .llm_manager
        .generate_sql(&text, &schema)
        .await
        .map_err(|e| match e {
            LlmError::NoExtractableQuery => {
                warn!("Model output for '{}' held no SQL", text);
                ApiError::internal(e.to_string())
            }
            other => {
                error!("LLM error: {}", other);
                ApiError::internal("Failed to generate SQL")
            }
        })?;

    info!("Generated SQL: {}", generated.sql);
    Ok(Json(TextToSqlResponse { query: generated.sql }))
}

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    user: Option<AuthUser>,
    ApiJson(payload): ApiJson<ExecuteQueryRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    let (query, db_config) = match (payload.query, payload.db_config) {
        (Some(query), Some(db_config)) if !query.is_empty() => (query, db_config),
        _ => return Err(ApiError::bad_request("Query and DB config are required")),
    };

    if let Err(rejection) = check_statement(&query) {
        warn!("Rejected query ({:?}): {}", rejection, query);
        return Err(rejection.into());
    }

    info!("Received query for execution: {}", query);
    let result = execute_statement(&db_config, &query)
        .await
        .map_err(|e| ApiError::internal("SQL Execution failed").with_detail(e))?;

    if let Some(AuthUser(user_id)) = user {
        if let Err(e) = state
            .history
            .record(&user_id, payload.text.as_deref(), &query)
            .await
        {
            error!("Failed to record history for user {}: {}", user_id, e);
        }
    }

    Ok(Json(result))
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state.history.list_for_user(&user_id).await.map_err(|e| {
        error!("Failed to fetch history for user {}: {}", user_id, e);
        ApiError::from(e)
    })?;

    Ok(Json(HistoryResponse { history }))
}

pub async fn set_bookmark(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<BookmarkRequest>,
) -> Result<Json<HistoryRecord>, ApiError> {
    let updated = state
        .history
        .set_bookmark(&user_id, id, payload.is_bookmarked)
        .await
        .map_err(|e| {
            error!("Failed to update bookmark {} for user {}: {}", id, user_id, e);
            ApiError::internal("Failed to update history.")
        })?;

    updated
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "History entry not found."))
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        llm_backend: state.llm_manager.backend().to_string(),
        llm_model: state.config.llm.model.clone(),
    })
}
