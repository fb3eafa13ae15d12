//! The serverless function endpoints.
//!
//! Every function follows the same shape: the [CorsGate](crate::CorsGate) middleware handles
//! CORS and preflight, extractors authenticate the caller and parse the body, the handler
//! validates its input, passes the caller through the shared [RateLimiter], and only then does
//! its side-effecting work.

pub mod cloudflare_worker;
pub mod contact_email;
pub mod stripe_product;

use crate::auth::{Authenticator, Caller};
use crate::error::FunctionError;
use crate::error_log::{ErrorLog, ErrorLogEntry, ErrorType};
use crate::identifier::{client_ip, RateLimitIdentifier};
use crate::limiter::{RateLimitOutcome, RateLimiter};
use crate::policy::RateLimitPolicy;
use crate::upstream::{BillingProvider, EmailProvider, UpstreamError, WorkerProvider};
use actix_web::{web, HttpRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Largest JSON body accepted by any function.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Rate limit policy of each function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionPolicies {
    pub create_cloudflare_worker: RateLimitPolicy,
    pub create_stripe_product: RateLimitPolicy,
    pub send_contact_email: RateLimitPolicy,
}

impl Default for FunctionPolicies {
    fn default() -> Self {
        Self {
            create_cloudflare_worker: RateLimitPolicy::new(5, 20),
            create_stripe_product: RateLimitPolicy::new(10, 50),
            send_contact_email: RateLimitPolicy::new(3, 10),
        }
    }
}

/// Where contact form messages are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactSettings {
    pub recipient: String,
    pub from: String,
    pub subject_prefix: String,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            recipient: "contact@bitminded.ch".to_string(),
            from: "BitMinded <noreply@bitminded.ch>".to_string(),
            subject_prefix: "[Contact] ".to_string(),
        }
    }
}

/// Shared state handed to every function through [web::Data].
pub struct FunctionState {
    pub limiter: RateLimiter,
    pub authenticator: Arc<dyn Authenticator>,
    pub error_log: Arc<dyn ErrorLog>,
    pub workers: Arc<dyn WorkerProvider>,
    pub billing: Arc<dyn BillingProvider>,
    pub email: Arc<dyn EmailProvider>,
    pub policies: FunctionPolicies,
    pub contact: ContactSettings,
}

impl FunctionState {
    /// Consumes a rate limit slot for `ctx`, or fails with [FunctionError::RateLimited].
    pub async fn admit(
        &self,
        ctx: &CallContext,
        policy: &RateLimitPolicy,
    ) -> Result<(), FunctionError> {
        match self
            .limiter
            .check_and_consume(&ctx.identifier, ctx.function_name, policy)
            .await
        {
            RateLimitOutcome::Allowed => Ok(()),
            RateLimitOutcome::Denied {
                retry_after_seconds,
            } => Err(FunctionError::RateLimited {
                retry_after_seconds,
            }),
        }
    }

    /// Writes an entry to the error log; a failure to do so is only logged.
    pub async fn record_failure(&self, entry: ErrorLogEntry) {
        log::error!(
            "{} failed ({}): {}",
            entry.function_name,
            entry.error_type,
            entry.error_message
        );
        if let Err(e) = self.error_log.record(entry).await {
            log::warn!("Unable to write error log entry: {e}");
        }
    }

    /// Logs an upstream failure with its context and converts it for the caller.
    pub async fn upstream_failure(
        &self,
        ctx: &CallContext,
        error: UpstreamError,
        details: serde_json::Value,
    ) -> FunctionError {
        let entry = ctx
            .log_entry(error.error_type(), error.to_string())
            .details(details);
        self.record_failure(entry).await;
        error.into()
    }
}

/// Who is calling which function, for rate limiting and error logging.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub function_name: &'static str,
    pub identifier: RateLimitIdentifier,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub payload: Option<serde_json::Value>,
}

impl CallContext {
    pub fn new(function_name: &'static str, caller: Option<&Caller>, req: &HttpRequest) -> Self {
        Self {
            function_name,
            identifier: RateLimitIdentifier::resolve(caller, req.headers()),
            user_id: caller.map(|c| c.user_id.clone()),
            ip_address: client_ip(req.headers()),
            payload: None,
        }
    }

    /// Attaches the request body to logged failures.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload = serde_json::to_value(payload).ok();
        self
    }

    pub fn log_entry(&self, error_type: ErrorType, message: impl Into<String>) -> ErrorLogEntry {
        ErrorLogEntry::new(self.function_name, error_type, message)
            .user_id(self.user_id.as_deref())
            .ip_address(Some(&self.ip_address))
            .request_payload(self.payload.clone())
    }
}

/// JSON body errors are reported as validation failures.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, _req| FunctionError::validation(err.to_string()).into())
}

/// Registers every function, for use with [App::configure](actix_web::App::configure).
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(cloudflare_worker::create_cloudflare_worker)
        .service(stripe_product::create_stripe_product)
        .service(contact_email::send_contact_email);
}
