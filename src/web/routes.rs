use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::state::AppState;

// API Routes - JSON endpoints used by the client session
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest(
            "/api",
            Router::new()
                // Text-to-SQL pipeline
                .route("/connect-db", post(handlers::api::connect_db))
                .route("/text-to-sql", post(handlers::api::text_to_sql))
                .route("/execute-query", post(handlers::api::execute_query))

                // Per-user history
                .route("/history", get(handlers::api::list_history))
                .route("/history/{id}/bookmark", post(handlers::api::set_bookmark))

                // System status
                .route("/status", get(handlers::api::system_status))
        )
}

pub fn app(state: Arc<AppState>) -> Router {
    api_routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, HistoryConfig};
    use crate::db::history_store::HistoryStore;
    use crate::llm::testing::CannedGenerator;
    use crate::llm::LlmManager;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `oneshot`

    struct TestApp {
        _dir: tempfile::TempDir,
        state: Arc<AppState>,
        router: Router,
    }

    fn test_app(generator: CannedGenerator) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "test-secret".to_string();
        config.history = HistoryConfig {
            connection_string: dir.path().join("history.duckdb").to_string_lossy().to_string(),
            pool_size: 2,
        };

        let history = HistoryStore::open(&config.history).unwrap();
        let llm = LlmManager::with_generator("canned", Box::new(generator)).unwrap();
        let state = Arc::new(AppState::new(config, llm, history));
        let router = app(state.clone());
        TestApp { _dir: dir, state, router }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn db_config() -> Value {
        json!({"host": "127.0.0.1", "port": 1, "user": "root", "password": "pw", "database": "school"})
    }

    #[tokio::test]
    async fn text_to_sql_returns_extracted_statement() {
        let app = test_app(CannedGenerator::replying("```sql\nSELECT name FROM teachers WHERE name LIKE 'B%';\n```"));
        let (status, body) = send(
            &app.router,
            post_json(
                "/api/text-to-sql",
                json!({"text": "teachers starting with B", "schema": {"teachers": ["id", "name"]}}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"query": "SELECT name FROM teachers WHERE name LIKE 'B%';"}));
    }

    #[tokio::test]
    async fn text_to_sql_requires_text_and_schema() {
        let app = test_app(CannedGenerator::replying("SELECT 1 FROM t;"));

        let (status, body) = send(&app.router, post_json("/api/text-to-sql", json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Text and schema are required");

        let (status, _) = send(
            &app.router,
            post_json("/api/text-to-sql", json!({"text": "", "schema": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn text_to_sql_reports_unextractable_output() {
        let app = test_app(CannedGenerator::replying("I cannot help"));
        let (status, body) = send(
            &app.router,
            post_json("/api/text-to-sql", json!({"text": "hi", "schema": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "No valid SQL query extracted.");
    }

    #[tokio::test]
    async fn text_to_sql_hides_upstream_detail() {
        let app = test_app(CannedGenerator::failing());
        let (status, body) = send(
            &app.router,
            post_json("/api/text-to-sql", json!({"text": "hi", "schema": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"message": "Failed to generate SQL"}));
    }

    #[tokio::test]
    async fn execute_query_screens_statements_before_connecting() {
        let app = test_app(CannedGenerator::failing());

        let (status, body) = send(
            &app.router,
            post_json("/api/execute-query", json!({"query": "SELECT * FROM t;"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Query and DB config are required");

        let (status, body) = send(
            &app.router,
            post_json("/api/execute-query", json!({"query": "DROP TABLE t;", "dbConfig": db_config()})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Forbidden operation detected in query.");

        let (status, body) = send(
            &app.router,
            post_json("/api/execute-query", json!({"query": "UPDATE t SET x=1", "dbConfig": db_config()})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Query seems incomplete (missing FROM clause).");
    }

    #[tokio::test]
    async fn malformed_bodies_are_json_bad_requests() {
        let app = test_app(CannedGenerator::failing());

        let (status, body) = send(
            &app.router,
            post_json("/api/execute-query", json!({"query": "SELECT * FROM t;", "dbConfig": {"host": "x"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid request body");
        assert!(body["error"].is_string());

        let (status, body) = send(
            &app.router,
            post_json("/api/text-to-sql", json!({"text": "hi", "schema": {"teachers": "id"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid request body");

        let request = Request::builder()
            .method("POST")
            .uri("/api/connect-db")
            .body(Body::from(db_config().to_string()))
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn stacked_statements_fail_as_one_execution_error() {
        let app = test_app(CannedGenerator::failing());
        let (status, body) = send(
            &app.router,
            post_json(
                "/api/execute-query",
                json!({"query": "SELECT id FROM a; SELECT name, email FROM b", "dbConfig": db_config()}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "SQL Execution failed");
        assert!(body["error"].as_str().unwrap().contains("one SQL statement"));
    }

    #[tokio::test]
    async fn unreachable_database_is_an_execution_failure() {
        let app = test_app(CannedGenerator::failing());
        let (status, body) = send(
            &app.router,
            post_json("/api/execute-query", json!({"query": "SELECT * FROM t;", "dbConfig": db_config()})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "SQL Execution failed");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn unreachable_database_fails_connect() {
        let app = test_app(CannedGenerator::failing());
        let (status, body) = send(&app.router, post_json("/api/connect-db", db_config())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Connection failed");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn history_requires_a_valid_token() {
        let app = test_app(CannedGenerator::failing());

        let request = Request::builder().uri("/api/history").body(Body::empty()).unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Access denied. No token provided.");

        let request = Request::builder()
            .uri("/api/history")
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn history_lists_and_bookmarks_the_callers_rows() {
        let app = test_app(CannedGenerator::failing());
        app.state.history.record("5", Some("all rooms"), "SELECT * FROM rooms;").await.unwrap();
        let other = app.state.history.record("6", None, "SELECT * FROM other;").await.unwrap();
        let token = app.state.auth.issue("5").unwrap();

        let request = Request::builder()
            .uri("/api/history")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let history = body["history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["query"], "SELECT * FROM rooms;");
        assert_eq!(history[0]["is_bookmarked"], false);
        let id = history[0]["id"].as_i64().unwrap();

        let mut request = post_json(&format!("/api/history/{}/bookmark", id), json!({"is_bookmarked": true}));
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_bookmarked"], true);

        let mut request = post_json(
            &format!("/api/history/{}/bookmark", other.id),
            json!({"is_bookmarked": true}),
        );
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reports_backend() {
        let app = test_app(CannedGenerator::failing());
        let request = Request::builder().uri("/api/status").body(Body::empty()).unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["llm_backend"], "canned");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
