use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;
use serde::Serialize;

use crate::db::history_store::HistoryError;
use crate::safety::SafetyRejection;
use crate::web::auth::AuthError;

/// JSON error body: `{"message": ..., "error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_detail(mut self, detail: impl ToString) -> Self {
        self.error = Some(detail.to_string());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: &self.message,
            error: self.error.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SafetyRejection> for ApiError {
    fn from(rejection: SafetyRejection) -> Self {
        let status = match rejection {
            SafetyRejection::BlockedKeyword(_) => StatusCode::FORBIDDEN,
            SafetyRejection::MissingFrom => StatusCode::BAD_REQUEST,
        };
        Self::new(status, rejection.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Signing(_) => Self::internal("Failed to issue token."),
            other => Self::new(StatusCode::UNAUTHORIZED, other.to_string()),
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(_: HistoryError) -> Self {
        Self::internal("Failed to fetch history.")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {}", rejection.body_text());
        Self::bad_request("Invalid request body").with_detail(rejection.body_text())
    }
}

/// `Json` whose rejections render as a 400 `ApiError` body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}
