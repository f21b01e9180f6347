//! Connection authentication.
//!
//! Token issuance and verification live in the platform's auth service;
//! this module only models its single capability - "validate bearer
//! credential, yield an identity or reject" - behind the
//! [`CredentialValidator`] trait so tests can substitute a local map.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Authentication failure reasons.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing Authorization header")]
    MissingCredential,

    /// Credential present but not a `Bearer <token>` value.
    #[error("malformed Authorization header")]
    MalformedCredential,

    /// The validator rejected the credential.
    #[error("credential rejected")]
    Rejected,

    /// The connection has not completed authentication.
    #[error("connection is not authenticated")]
    Unauthenticated,

    /// The validator could not be reached.
    #[error("credential validator unavailable: {0}")]
    Unavailable(String),
}

/// External collaborator that validates bearer credentials.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Validate a bearer token, yielding the caller's user id.
    async fn validate(&self, token: &str) -> Result<i64, AuthError>;
}

/// Strip the `Bearer ` scheme from an Authorization header value.
pub fn parse_bearer(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedCredential)?;
    if token.is_empty() {
        return Err(AuthError::MalformedCredential);
    }
    Ok(token)
}

/// Resolve the identity behind a request's `Authorization` header.
pub async fn authenticate_header(
    headers: &HeaderMap,
    validator: &dyn CredentialValidator,
) -> Result<i64, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredential)?;
    let token = parse_bearer(header)?;
    validator.validate(token).await
}

// ============================================================================
// Validator implementations
// ============================================================================

/// Fixed token → user id map. Used by tests and local development
/// (`AUTH_MODE=static`, tokens from `AUTH_TOKENS`).
pub struct StaticCredentialValidator {
    tokens: HashMap<String, i64>,
}

impl StaticCredentialValidator {
    /// Build from an explicit map.
    pub fn new(tokens: HashMap<String, i64>) -> Self {
        Self { tokens }
    }

    /// Parse a `token:user_id` comma list, e.g. `"alice-tok:1,bob-tok:2"`.
    /// Malformed entries are skipped with a warning.
    pub fn from_spec(spec: &str) -> Self {
        let mut tokens = HashMap::new();
        for entry in spec.split(',').filter(|s| !s.is_empty()) {
            match entry.split_once(':').map(|(t, id)| (t, id.parse::<i64>())) {
                Some((token, Ok(user_id))) => {
                    tokens.insert(token.to_string(), user_id);
                }
                _ => warn!(entry, "skipping malformed AUTH_TOKENS entry"),
            }
        }
        Self { tokens }
    }
}

#[async_trait]
impl CredentialValidator for StaticCredentialValidator {
    async fn validate(&self, token: &str) -> Result<i64, AuthError> {
        self.tokens.get(token).copied().ok_or(AuthError::Rejected)
    }
}

/// Validates credentials against the platform auth service over HTTP.
///
/// `GET {base_url}/session` with the bearer header; a success response
/// carries `{"userId": n}`.
pub struct HttpCredentialValidator {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    user_id: i64,
}

impl HttpCredentialValidator {
    /// Create a validator for the auth service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CredentialValidator for HttpCredentialValidator {
    async fn validate(&self, token: &str) -> Result<i64, AuthError> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::Rejected);
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(status.to_string()));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(session.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_parsing() {
        assert_eq!(parse_bearer("Bearer abc").unwrap(), "abc");
        assert!(matches!(
            parse_bearer("Basic abc"),
            Err(AuthError::MalformedCredential)
        ));
        assert!(matches!(
            parse_bearer("Bearer "),
            Err(AuthError::MalformedCredential)
        ));
    }

    #[tokio::test]
    async fn static_validator_accepts_known_tokens_only() {
        let validator = StaticCredentialValidator::from_spec("alice-tok:1,bob-tok:2,broken");
        assert_eq!(validator.validate("alice-tok").await.unwrap(), 1);
        assert_eq!(validator.validate("bob-tok").await.unwrap(), 2);
        assert!(matches!(
            validator.validate("unknown").await,
            Err(AuthError::Rejected)
        ));
    }

    #[tokio::test]
    async fn header_authentication_paths() {
        let validator = StaticCredentialValidator::from_spec("alice-tok:1");

        let mut headers = HeaderMap::new();
        assert!(matches!(
            authenticate_header(&headers, &validator).await,
            Err(AuthError::MissingCredential)
        ));

        headers.insert(AUTHORIZATION, "Bearer alice-tok".parse().unwrap());
        assert_eq!(authenticate_header(&headers, &validator).await.unwrap(), 1);

        headers.insert(AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(matches!(
            authenticate_header(&headers, &validator).await,
            Err(AuthError::Rejected)
        ));
    }
}
