use crate::auth::AuthenticatedCaller;
use crate::error::FunctionError;
use crate::functions::{CallContext, FunctionState};
use crate::upstream::{BillingInterval, NewPrice, NewProduct};
use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

pub const FUNCTION_NAME: &str = "create-stripe-product";

const MAX_NAME_LENGTH: usize = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Amount in the smallest currency unit, keyed by ISO 4217 currency code.
    pub prices: BTreeMap<String, i64>,
    /// Recurring interval applied to every price; one-off prices when absent.
    #[serde(default)]
    pub interval: Option<BillingInterval>,
}

impl CreateProductRequest {
    pub fn validate(&self) -> Result<(), FunctionError> {
        let name = self.name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(FunctionError::validation(format!(
                "name must be between 1 and {MAX_NAME_LENGTH} characters"
            )));
        }
        if self.prices.is_empty() {
            return Err(FunctionError::validation("at least one price is required"));
        }
        for (currency, amount) in &self.prices {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(FunctionError::validation(format!(
                    "invalid currency code {currency:?}"
                )));
            }
            if *amount <= 0 {
                return Err(FunctionError::validation(format!(
                    "price for {currency} must be positive"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductResponse {
    pub success: bool,
    pub product_id: String,
    /// Created price ids by currency.
    pub prices: BTreeMap<String, String>,
    /// Currencies whose price could not be created; the product and other prices are kept.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub price_errors: BTreeMap<String, String>,
}

/// Creates a billing product and one price per requested currency.
#[post("/create-stripe-product")]
pub async fn create_stripe_product(
    state: web::Data<FunctionState>,
    caller: AuthenticatedCaller,
    req: HttpRequest,
    body: web::Json<CreateProductRequest>,
) -> Result<HttpResponse, FunctionError> {
    let body = body.into_inner();
    body.validate()?;
    let ctx = CallContext::new(FUNCTION_NAME, Some(&caller.0), &req).with_payload(&body);
    state
        .admit(&ctx, &state.policies.create_stripe_product)
        .await?;

    let new_product = NewProduct {
        name: body.name.trim().to_string(),
        description: body.description.clone().filter(|d| !d.trim().is_empty()),
    };
    let product = match state.billing.create_product(&new_product).await {
        Ok(product) => product,
        Err(e) => {
            return Err(state
                .upstream_failure(&ctx, e, json!({ "stage": "product" }))
                .await)
        }
    };

    let mut prices = BTreeMap::new();
    let mut price_errors = BTreeMap::new();
    for (currency, amount) in &body.prices {
        let currency = currency.to_ascii_lowercase();
        let new_price = NewPrice {
            product_id: product.id.clone(),
            currency: currency.clone(),
            unit_amount: *amount,
            interval: body.interval,
        };
        match state.billing.create_price(&new_price).await {
            Ok(price) => {
                prices.insert(currency, price.id);
            }
            Err(e) => {
                let message = e.public_message();
                let details = json!({
                    "stage": "price",
                    "product_id": product.id,
                    "currency": currency,
                });
                state.upstream_failure(&ctx, e, details).await;
                price_errors.insert(currency, message);
            }
        }
    }

    Ok(HttpResponse::Ok().json(CreateProductResponse {
        success: true,
        product_id: product.id,
        prices,
        price_errors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prices: &[(&str, i64)]) -> CreateProductRequest {
        CreateProductRequest {
            name: "Course".to_string(),
            description: None,
            prices: prices
                .iter()
                .map(|(currency, amount)| (currency.to_string(), *amount))
                .collect(),
            interval: None,
        }
    }

    #[test]
    fn test_validation() {
        assert!(request(&[("chf", 1500), ("EUR", 1400)]).validate().is_ok());
        assert!(request(&[]).validate().is_err());
        assert!(request(&[("chfx", 1500)]).validate().is_err());
        assert!(request(&[("chf", 0)]).validate().is_err());

        let mut blank = request(&[("chf", 1500)]);
        blank.name = "  ".to_string();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_response_omits_empty_errors() {
        let response = CreateProductResponse {
            success: true,
            product_id: "prod_1".to_string(),
            prices: BTreeMap::from([("chf".to_string(), "price_1".to_string())]),
            price_errors: BTreeMap::new(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["productId"], "prod_1");
        assert!(value.get("priceErrors").is_none());
    }
}
