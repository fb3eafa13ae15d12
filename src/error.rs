use crate::auth::AuthError;
use crate::upstream::UpstreamError;
use actix_web::http::header::{HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Every way a function can fail, as seen by the caller.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_seconds: u64 },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("{0}")]
    Internal(String),
}

impl FunctionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Message placed in the JSON body; internal details are not exposed.
    fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(AuthError::Backend(_)) => "Authentication failed".to_string(),
            Self::Upstream(e) => e.public_message(),
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for FunctionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(e) if e.is_rejection() => StatusCode::BAD_REQUEST,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            Self::RateLimited {
                retry_after_seconds,
            } => {
                let mut response = builder.json(json!({
                    "error": self.to_string(),
                    "retry_after": retry_after_seconds,
                }));
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(*retry_after_seconds));
                response
            }
            _ => builder.json(json!({
                "success": false,
                "error": self.public_message(),
            })),
        }
    }
}
