use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::web::error::ApiError;
use crate::web::state::AppState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Access denied. No token provided.")]
    MissingToken,
    #[error("Invalid token.")]
    InvalidToken,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId", deserialize_with = "string_or_number")]
    pub user_id: String,
    pub exp: u64,
}

// Tokens minted elsewhere carry numeric user ids
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected userId: {}", other))),
    }
}

/// HS256 bearer tokens carrying `{userId, exp}`.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            ttl_secs: config.token_ttl_secs,
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String, AuthError> {
        let exp = chrono::Utc::now().timestamp().max(0) as u64 + self.ttl_secs;
        let claims = Claims {
            user_id: user_id.to_string(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims.user_id)
            .map_err(|e| {
                debug!("Rejected bearer token: {}", e);
                AuthError::InvalidToken
            })
    }

    pub fn verify_headers(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}

/// The authenticated caller's user id.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user_id = state.auth.verify_headers(&parts.headers)?;
        Ok(AuthUser(user_id))
    }
}

/// Anonymous callers are allowed; a bad token is treated as anonymous.
impl OptionalFromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Option<Self>, Self::Rejection> {
        match state.auth.verify_headers(&parts.headers) {
            Ok(user_id) => Ok(Some(AuthUser(user_id))),
            Err(AuthError::MissingToken) => Ok(None),
            Err(e) => {
                warn!("Ignoring unusable bearer token: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn verifier(secret: &str) -> TokenVerifier {
        TokenVerifier::new(&AuthConfig {
            jwt_secret: secret.to_string(),
            token_ttl_secs: 60,
        })
    }

    #[test]
    fn issued_tokens_verify() {
        let v = verifier("s3cret");
        let token = v.issue("42").unwrap();
        assert_eq!(v.verify(&token).unwrap(), "42");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = verifier("one").issue("42").unwrap();
        assert!(matches!(verifier("two").verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = Claims {
            user_id: "42".to_string(),
            exp: 1_000,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"s3cret")).unwrap();
        assert!(matches!(verifier("s3cret").verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn numeric_user_ids_are_accepted() {
        let exp = chrono::Utc::now().timestamp() as u64 + 60;
        let token = encode(
            &Header::default(),
            &serde_json::json!({"userId": 7, "exp": exp}),
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        assert_eq!(verifier("s3cret").verify(&token).unwrap(), "7");
    }

    #[test]
    fn header_parsing() {
        let v = verifier("s3cret");
        let mut headers = HeaderMap::new();
        assert!(matches!(v.verify_headers(&headers), Err(AuthError::MissingToken)));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(v.verify_headers(&headers), Err(AuthError::MissingToken)));

        let token = v.issue("9").unwrap();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        assert_eq!(v.verify_headers(&headers).unwrap(), "9");
    }
}
