use crate::upstream::{
    decode_response, BillingProvider, NewPrice, NewProduct, Price, Product, Provider,
    UpstreamError,
};
use async_trait::async_trait;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

fn error_message(body: &serde_json::Value) -> Option<String> {
    body["error"]["message"].as_str().map(ToOwned::to_owned)
}

/// Creates products and prices through the Stripe REST API.
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(client: reqwest::Client, secret_key: impl Into<String>) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            secret_key: secret_key.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(UpstreamError::network(Provider::Stripe))?;
        decode_response(Provider::Stripe, response, error_message).await
    }
}

fn product_form(product: &NewProduct) -> Vec<(&'static str, String)> {
    let mut form = vec![("name", product.name.clone())];
    if let Some(description) = &product.description {
        form.push(("description", description.clone()));
    }
    form
}

fn price_form(price: &NewPrice) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("product", price.product_id.clone()),
        ("currency", price.currency.clone()),
        ("unit_amount", price.unit_amount.to_string()),
    ];
    if let Some(interval) = price.interval {
        form.push(("recurring[interval]", interval.as_str().to_string()));
    }
    form
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_product(&self, product: &NewProduct) -> Result<Product, UpstreamError> {
        self.post_form("products", &product_form(product)).await
    }

    async fn create_price(&self, price: &NewPrice) -> Result<Price, UpstreamError> {
        self.post_form("prices", &price_form(price)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::BillingInterval;
    use serde_json::json;

    #[test]
    fn test_error_message() {
        let body = json!({
            "error": { "type": "invalid_request_error", "message": "Invalid currency: xyz" }
        });
        assert_eq!(error_message(&body).as_deref(), Some("Invalid currency: xyz"));
    }

    #[test]
    fn test_price_form() {
        let form = price_form(&NewPrice {
            product_id: "prod_1".to_string(),
            currency: "chf".to_string(),
            unit_amount: 1500,
            interval: Some(BillingInterval::Month),
        });
        assert_eq!(
            form,
            vec![
                ("product", "prod_1".to_string()),
                ("currency", "chf".to_string()),
                ("unit_amount", "1500".to_string()),
                ("recurring[interval]", "month".to_string()),
            ]
        );
        let form = product_form(&NewProduct {
            name: "Course".to_string(),
            description: None,
        });
        assert_eq!(form, vec![("name", "Course".to_string())]);
    }
}
