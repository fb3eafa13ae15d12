//! Bearer token authentication against the hosted backend.

use crate::error::FunctionError;
use crate::error_log::{ErrorLogEntry, ErrorType};
use crate::functions::FunctionState;
use crate::identifier::client_ip;
use actix_web::dev::Payload;
use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::{web, FromRequest, HttpRequest};
use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Identity of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Caller {
    #[serde(rename = "id")]
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication backend error: {0}")]
    Backend(String),
}

/// Verifies a bearer token and looks up who it belongs to.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError>;
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Accepts a fixed set of tokens.
///
/// Intended for development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Caller>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(
            token.into(),
            Caller {
                user_id: user_id.into(),
                email: None,
            },
        );
        self
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Resolves tokens through the hosted backend's `GET /auth/v1/user` endpoint.
#[derive(Clone)]
pub struct BackendAuthenticator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BackendAuthenticator {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Authenticator for BackendAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AuthError::InvalidToken);
        }
        if !status.is_success() {
            return Err(AuthError::Backend(format!("unexpected status {status}")));
        }
        response
            .json::<Caller>()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))
    }
}

/// Credentials found on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Credentials {
    Absent,
    Malformed,
    Bearer(String),
}

impl Credentials {
    fn from_headers(headers: &HeaderMap) -> Self {
        if !headers.contains_key(AUTHORIZATION) {
            return Self::Absent;
        }
        match bearer_token(headers) {
            Some(token) => Self::Bearer(token.to_owned()),
            None => Self::Malformed,
        }
    }
}

/// Resolves the caller behind a request, or `None` when no `Authorization` header was sent.
///
/// Backend failures are written to the error log before being returned.
fn resolve_caller(
    req: &HttpRequest,
) -> LocalBoxFuture<'static, Result<Option<Caller>, FunctionError>> {
    let state = req.app_data::<web::Data<FunctionState>>().cloned();
    let credentials = Credentials::from_headers(req.headers());
    let function_name = req.path().trim_start_matches('/').to_string();
    let ip_address = client_ip(req.headers());
    Box::pin(async move {
        let state = state.ok_or_else(|| {
            FunctionError::Internal("Function state is not configured".to_string())
        })?;
        let token = match credentials {
            Credentials::Absent => return Ok(None),
            Credentials::Malformed => return Err(AuthError::InvalidToken.into()),
            Credentials::Bearer(token) => token,
        };
        match state.authenticator.authenticate(&token).await {
            Ok(caller) => Ok(Some(caller)),
            Err(e @ AuthError::Backend(_)) => {
                let entry = ErrorLogEntry::new(function_name, ErrorType::Auth, e.to_string())
                    .ip_address(Some(&ip_address));
                state.record_failure(entry).await;
                Err(e.into())
            }
            Err(e) => {
                log::info!("Rejected caller: {e}");
                Err(e.into())
            }
        }
    })
}

/// Extractor for handlers that require a signed in caller.
///
/// Rejects the request with a 401 before the handler body (and so before any rate limit slot is
/// consumed).
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller(pub Caller);

impl FromRequest for AuthenticatedCaller {
    type Error = FunctionError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let caller = resolve_caller(req);
        Box::pin(async move {
            caller
                .await?
                .map(AuthenticatedCaller)
                .ok_or_else(|| FunctionError::from(AuthError::MissingToken))
        })
    }
}

/// Extractor for handlers where signing in is optional.
///
/// Requests without an `Authorization` header are anonymous. A header that is present but
/// malformed, expired or unverifiable is still a 401.
#[derive(Debug, Clone)]
pub struct OptionalCaller(pub Option<Caller>);

impl FromRequest for OptionalCaller {
    type Error = FunctionError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let caller = resolve_caller(req);
        Box::pin(async move { caller.await.map(OptionalCaller) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderValue;

    fn with_auth(value: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(AUTHORIZATION, HeaderValue::from_static(value));
        map
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&with_auth("Bearer abc123")), Some("abc123"));
        assert_eq!(bearer_token(&with_auth("bearer  abc123 ")), Some("abc123"));
        assert_eq!(bearer_token(&with_auth("Basic abc123")), None);
        assert_eq!(bearer_token(&with_auth("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_credentials() {
        assert_eq!(
            Credentials::from_headers(&HeaderMap::new()),
            Credentials::Absent
        );
        assert_eq!(
            Credentials::from_headers(&with_auth("Basic abc123")),
            Credentials::Malformed
        );
        assert_eq!(
            Credentials::from_headers(&with_auth("Bearer abc123")),
            Credentials::Bearer("abc123".to_string())
        );
    }

    #[actix_web::test]
    async fn test_static_tokens() {
        let auth = StaticTokenAuthenticator::new().with_token("t1", "user-1");
        assert_eq!(auth.authenticate("t1").await.unwrap().user_id, "user-1");
        assert!(matches!(
            auth.authenticate("t2").await,
            Err(AuthError::InvalidToken)
        ));
    }
}
