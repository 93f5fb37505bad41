/// Stripe REST client
///
/// A thin `reqwest` wrapper implementing [`PaymentProvider`]. Requests are
/// form-encoded with Stripe's bracketed keys (`line_items[0][price_data][currency]`)
/// and authenticated with the secret key as a bearer token.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::provider::{
    CheckoutRequest, CheckoutSession, Customer, LineItemPrice, PaymentError, PaymentProvider,
    PaymentResult, Price, PriceData, Subscription,
};

/// Default API endpoint
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

type FormParams = Vec<(String, String)>;

/// Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    /// Creates a client for `api_base` (normally [`DEFAULT_API_BASE`])
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> PaymentResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &FormParams,
    ) -> PaymentResult<T> {
        if self.secret_key.is_empty() {
            return Err(PaymentError::NotConfigured);
        }

        let url = format!("{}/v1/{}", self.api_base, path);
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&self.secret_key);

        if !params.is_empty() {
            builder = if method == Method::GET {
                builder.query(params)
            } else {
                builder.form(params)
            };
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| body.clone());

            tracing::warn!(path, status = status.as_u16(), "Stripe request failed");
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| PaymentError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct CustomerList {
    data: Vec<Customer>,
}

fn push_metadata(params: &mut FormParams, prefix: &str, metadata: &BTreeMap<String, String>) {
    for (key, value) in metadata {
        params.push((format!("{}[{}]", prefix, key), value.clone()));
    }
}

fn push_price_data(params: &mut FormParams, prefix: &str, price: &PriceData) {
    params.push((format!("{}[currency]", prefix), price.currency.clone()));
    params.push((format!("{}[unit_amount]", prefix), price.unit_amount.to_string()));
    params.push((format!("{}[product_data][name]", prefix), price.product_name.clone()));
    if let Some(description) = &price.product_description {
        params.push((
            format!("{}[product_data][description]", prefix),
            description.clone(),
        ));
    }
    if let Some(interval) = price.recurring {
        params.push((
            format!("{}[recurring][interval]", prefix),
            interval.as_str().to_string(),
        ));
    }
}

/// Encodes a checkout request as Stripe form parameters
pub fn checkout_params(request: &CheckoutRequest) -> FormParams {
    let mut params = vec![
        ("mode".to_string(), request.mode.to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];

    for (index, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{}]", index);
        match &item.price {
            LineItemPrice::Existing(price_id) => {
                params.push((format!("{}[price]", prefix), price_id.clone()));
            }
            LineItemPrice::Inline(price) => {
                push_price_data(&mut params, &format!("{}[price_data]", prefix), price);
            }
        }
        params.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
    }

    if let Some(customer) = &request.customer {
        params.push(("customer".to_string(), customer.clone()));
    }
    if let Some(email) = &request.customer_email {
        params.push(("customer_email".to_string(), email.clone()));
    }
    if request.allow_promotion_codes {
        params.push(("allow_promotion_codes".to_string(), "true".to_string()));
    }

    push_metadata(&mut params, "metadata", &request.metadata);
    push_metadata(
        &mut params,
        "subscription_data[metadata]",
        &request.subscription_metadata,
    );

    params
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_customer(
        &self,
        email: &str,
        metadata: &BTreeMap<String, String>,
    ) -> PaymentResult<Customer> {
        let mut params = vec![("email".to_string(), email.to_string())];
        push_metadata(&mut params, "metadata", metadata);
        self.request(Method::POST, "customers", &params).await
    }

    async fn find_customer_by_email(&self, email: &str) -> PaymentResult<Option<Customer>> {
        let params = vec![
            ("email".to_string(), email.to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        let list: CustomerList = self.request(Method::GET, "customers", &params).await?;
        Ok(list.data.into_iter().next())
    }

    async fn create_price(&self, price: &PriceData) -> PaymentResult<Price> {
        let mut params = FormParams::new();
        params.push(("currency".to_string(), price.currency.clone()));
        params.push(("unit_amount".to_string(), price.unit_amount.to_string()));
        params.push(("product_data[name]".to_string(), price.product_name.clone()));
        if let Some(interval) = price.recurring {
            params.push((
                "recurring[interval]".to_string(),
                interval.as_str().to_string(),
            ));
        }
        self.request(Method::POST, "prices", &params).await
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> PaymentResult<CheckoutSession> {
        let params = checkout_params(request);
        let session: CheckoutSession = self
            .request(Method::POST, "checkout/sessions", &params)
            .await?;

        tracing::info!(session_id = %session.id, mode = %request.mode, "Checkout session created");
        Ok(session)
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> PaymentResult<CheckoutSession> {
        self.request(
            Method::GET,
            &format!("checkout/sessions/{}", session_id),
            &FormParams::new(),
        )
        .await
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> PaymentResult<Subscription> {
        self.request(
            Method::GET,
            &format!("subscriptions/{}", subscription_id),
            &FormParams::new(),
        )
        .await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> PaymentResult<Subscription> {
        self.request(
            Method::DELETE,
            &format!("subscriptions/{}", subscription_id),
            &FormParams::new(),
        )
        .await
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> PaymentResult<Subscription> {
        let params = vec![("cancel_at_period_end".to_string(), "true".to_string())];
        self.request(
            Method::POST,
            &format!("subscriptions/{}", subscription_id),
            &params,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::provider::{CheckoutMode, Interval, LineItem};

    fn value<'a>(params: &'a FormParams, key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_checkout_params_nesting() {
        let mut request = CheckoutRequest::new(
            CheckoutMode::Subscription,
            "https://example.com/ok",
            "https://example.com/cancel",
        )
        .with_line_item(LineItem::inline(
            PriceData::recurring(500, "Server 7 Premium", Interval::Month)
                .with_description("Monthly"),
        ))
        .with_line_item(LineItem::existing("price_ai"))
        .with_metadata("server_id", "7");
        request
            .subscription_metadata
            .insert("server_id".to_string(), "7".to_string());
        request.allow_promotion_codes = true;

        let params = checkout_params(&request);

        assert_eq!(value(&params, "mode"), Some("subscription"));
        assert_eq!(value(&params, "line_items[0][price_data][unit_amount]"), Some("500"));
        assert_eq!(
            value(&params, "line_items[0][price_data][product_data][name]"),
            Some("Server 7 Premium")
        );
        assert_eq!(
            value(&params, "line_items[0][price_data][recurring][interval]"),
            Some("month")
        );
        assert_eq!(value(&params, "line_items[1][price]"), Some("price_ai"));
        assert_eq!(value(&params, "metadata[server_id]"), Some("7"));
        assert_eq!(value(&params, "subscription_data[metadata][server_id]"), Some("7"));
        assert_eq!(value(&params, "allow_promotion_codes"), Some("true"));
        assert_eq!(value(&params, "customer_email"), None);
    }

    #[test]
    fn test_one_time_price_has_no_interval() {
        let request = CheckoutRequest::new(CheckoutMode::Payment, "a", "b")
            .with_line_item(LineItem::inline(PriceData::one_time(2500, "Donation")));

        let params = checkout_params(&request);
        assert!(params.iter().all(|(k, _)| !k.contains("recurring")));
        assert_eq!(value(&params, "line_items[0][quantity]"), Some("1"));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = StripeClient::new("", DEFAULT_API_BASE).unwrap();
        let result = client.retrieve_subscription("sub_1").await;
        assert!(matches!(result, Err(PaymentError::NotConfigured)));
    }
}
