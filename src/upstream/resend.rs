use crate::upstream::{
    decode_response, EmailProvider, OutgoingEmail, Provider, SentEmail, UpstreamError,
};
use async_trait::async_trait;

pub const DEFAULT_API_BASE: &str = "https://api.resend.com";

fn error_message(body: &serde_json::Value) -> Option<String> {
    body["message"].as_str().map(ToOwned::to_owned)
}

/// Sends email through the Resend API.
#[derive(Clone)]
pub struct ResendClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl ResendClient {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmailProvider for ResendClient {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentEmail, UpstreamError> {
        let response = self
            .client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await
            .map_err(UpstreamError::network(Provider::Resend))?;
        decode_response(Provider::Resend, response, error_message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message() {
        let body = json!({
            "statusCode": 422,
            "name": "validation_error",
            "message": "Invalid `from` field."
        });
        assert_eq!(error_message(&body).as_deref(), Some("Invalid `from` field."));
    }

    #[test]
    fn test_email_body() {
        let email = OutgoingEmail {
            from: "BitMinded <contact@bitminded.ch>".to_string(),
            to: vec!["team@bitminded.ch".to_string()],
            subject: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            reply_to: None,
        };
        let value = serde_json::to_value(&email).unwrap();
        assert_eq!(value["to"], json!(["team@bitminded.ch"]));
        assert!(value.get("reply_to").is_none());
    }
}
