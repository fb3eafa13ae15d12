//! Third-party APIs the functions forward to.

pub mod cloudflare;
pub mod resend;
pub mod stripe;

use crate::error_log::ErrorType;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub use cloudflare::CloudflareClient;
pub use resend::ResendClient;
pub use stripe::StripeClient;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Provider {
    Cloudflare,
    Stripe,
    Resend,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflare",
            Self::Stripe => "stripe",
            Self::Resend => "resend",
        }
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Cloudflare => "Cloudflare",
            Self::Stripe => "Stripe",
            Self::Resend => "Resend",
        })
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
    },
    #[error("Unable to reach {provider}: {source}")]
    Network {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected response from {provider}: {message}")]
    Decode { provider: Provider, message: String },
}

impl UpstreamError {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Api { provider, .. }
            | Self::Network { provider, .. }
            | Self::Decode { provider, .. } => *provider,
        }
    }

    /// Whether the provider refused the request itself (a 4xx), as opposed to failing.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { status, .. } if (400..500).contains(status))
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Network { .. } => ErrorType::Network,
            _ => ErrorType::Api(self.provider()),
        }
    }

    /// Message that is safe to return to the caller.
    ///
    /// Provider messages for rejected requests describe the caller's input, so they are passed
    /// through; anything else is summarized.
    pub fn public_message(&self) -> String {
        match self {
            Self::Api { message, .. } if self.is_rejection() => message.clone(),
            Self::Api { provider, .. } => format!("{provider} request failed"),
            Self::Network { provider, .. } => format!("Unable to reach {provider}"),
            Self::Decode { provider, .. } => format!("Unexpected response from {provider}"),
        }
    }

    pub(crate) fn network(provider: Provider) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Network { provider, source }
    }
}

/// Reads a provider response, decoding the body as `T` on success.
///
/// On an error status the provider's own message is pulled out of the body with
/// `error_message`, falling back to the raw body.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    provider: Provider,
    response: reqwest::Response,
    error_message: fn(&serde_json::Value) -> Option<String>,
) -> Result<T, UpstreamError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(UpstreamError::network(provider))?;
    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| {
                if text.is_empty() {
                    status.to_string()
                } else {
                    text.clone()
                }
            });
        return Err(UpstreamError::Api {
            provider,
            status: status.as_u16(),
            message,
        });
    }
    serde_json::from_str(&text).map_err(|e| UpstreamError::Decode {
        provider,
        message: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDeployment {
    /// Script name, which also becomes its `workers.dev` subdomain.
    pub name: String,
    /// ES module source.
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedWorker {
    pub name: String,
    pub url: String,
}

/// Hosts edge worker scripts.
#[async_trait]
pub trait WorkerProvider: Send + Sync {
    async fn deploy_worker(
        &self,
        deployment: &WorkerDeployment,
    ) -> Result<DeployedWorker, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Day,
    Week,
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrice {
    pub product_id: String,
    /// Lowercase ISO 4217 code.
    pub currency: String,
    /// Amount in the currency's smallest unit.
    pub unit_amount: i64,
    /// Recurring interval, or one-off when absent.
    pub interval: Option<BillingInterval>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Price {
    pub id: String,
    pub currency: String,
    pub unit_amount: Option<i64>,
}

/// Catalog and pricing at the billing provider.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_product(&self, product: &NewProduct) -> Result<Product, UpstreamError>;

    async fn create_price(&self, price: &NewPrice) -> Result<Price, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SentEmail {
    pub id: String,
}

/// Transactional email delivery.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentEmail, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message() {
        let rejected = UpstreamError::Api {
            provider: Provider::Resend,
            status: 422,
            message: "Invalid `to` field".to_string(),
        };
        assert!(rejected.is_rejection());
        assert_eq!(rejected.public_message(), "Invalid `to` field");
        assert_eq!(rejected.error_type(), ErrorType::Api(Provider::Resend));

        let failed = UpstreamError::Api {
            provider: Provider::Stripe,
            status: 500,
            message: "internal".to_string(),
        };
        assert!(!failed.is_rejection());
        assert_eq!(failed.public_message(), "Stripe request failed");

        let decode = UpstreamError::Decode {
            provider: Provider::Cloudflare,
            message: "missing field".to_string(),
        };
        assert_eq!(decode.public_message(), "Unexpected response from Cloudflare");
        assert_eq!(decode.error_type().label(), "cloudflare_api");
    }
}
