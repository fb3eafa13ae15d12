//! Categorized failure records for the serverless functions.

use crate::backend::StoreError;
use crate::upstream::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

/// Category of a logged failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorType {
    /// The upstream provider rejected or failed the request.
    Api(Provider),
    Network,
    /// The hosted auth backend could not resolve a session.
    Auth,
}

impl ErrorType {
    pub fn label(self) -> String {
        match self {
            Self::Api(provider) => format!("{}_api", provider.as_str()),
            Self::Network => "network".to_string(),
            Self::Auth => "auth".to_string(),
        }
    }
}

impl Display for ErrorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for ErrorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// One row of the error log table.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogEntry {
    pub function_name: String,
    pub error_type: ErrorType,
    pub error_message: String,
    pub error_details: serde_json::Value,
    pub user_id: Option<String>,
    pub request_payload: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn new(
        function_name: impl Into<String>,
        error_type: ErrorType,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            error_type,
            error_message: error_message.into(),
            error_details: serde_json::Value::Null,
            user_id: None,
            request_payload: None,
            ip_address: None,
            created_at: Utc::now(),
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.error_details = details;
        self
    }

    pub fn user_id(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(ToOwned::to_owned);
        self
    }

    pub fn request_payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.request_payload = payload;
        self
    }

    pub fn ip_address(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(ToOwned::to_owned);
        self
    }
}

/// Destination for [ErrorLogEntry] records.
#[async_trait]
pub trait ErrorLog: Send + Sync {
    async fn record(&self, entry: ErrorLogEntry) -> Result<(), StoreError>;
}

/// Keeps entries in process memory, newest last.
#[derive(Clone, Default)]
pub struct InMemoryErrorLog {
    entries: Arc<Mutex<Vec<ErrorLogEntry>>>,
}

impl InMemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ErrorLog for InMemoryErrorLog {
    async fn record(&self, entry: ErrorLogEntry) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_type_labels() {
        assert_eq!(ErrorType::Api(Provider::Stripe).label(), "stripe_api");
        assert_eq!(ErrorType::Api(Provider::Cloudflare).label(), "cloudflare_api");
        assert_eq!(ErrorType::Network.label(), "network");
        assert_eq!(ErrorType::Auth.to_string(), "auth");
    }

    #[test]
    fn test_entry_serialization() {
        let entry = ErrorLogEntry::new(
            "create-stripe-product",
            ErrorType::Api(Provider::Stripe),
            "No such price",
        )
        .details(json!({ "currency": "chf" }))
        .user_id(Some("user-1"))
        .ip_address(None);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["error_type"], "stripe_api");
        assert_eq!(value["error_details"]["currency"], "chf");
        assert_eq!(value["user_id"], "user-1");
        assert!(value["ip_address"].is_null());
    }

    #[actix_web::test]
    async fn test_in_memory_log() {
        let log = InMemoryErrorLog::new();
        log.record(ErrorLogEntry::new("f", ErrorType::Network, "boom"))
            .await
            .unwrap();
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error_message, "boom");
    }
}
