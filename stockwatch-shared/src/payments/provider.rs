/// Payment provider boundary
///
/// Route handlers never talk to the payment API directly. They go through the
/// [`PaymentProvider`] trait so tests can swap in an in-memory fake and the
/// production binary can use [`StripeClient`](super::stripe::StripeClient).
///
/// The types here mirror the small subset of the provider's object model the
/// service needs: customers, recurring prices, checkout sessions and
/// subscriptions.
///
/// # Example
///
/// ```no_run
/// use stockwatch_shared::payments::provider::{
///     CheckoutMode, CheckoutRequest, LineItem, PaymentProvider, PriceData,
/// };
///
/// # async fn example(provider: &dyn PaymentProvider) -> Result<(), Box<dyn std::error::Error>> {
/// let request = CheckoutRequest::new(
///     CheckoutMode::Payment,
///     "https://example.com/ok",
///     "https://example.com/cancel",
/// )
/// .with_line_item(LineItem::inline(PriceData::one_time(2500, "Donation")));
///
/// let session = provider.create_checkout_session(&request).await?;
/// println!("redirect to {:?}", session.url);
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Payment provider errors
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Transport failure talking to the provider
    #[error("Payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with an error object
    #[error("Payment provider error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Provider answered with something we could not decode
    #[error("Unexpected payment provider response: {0}")]
    Decode(String),

    /// No secret key configured
    #[error("Payment provider is not configured")]
    NotConfigured,
}

/// Result type for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;

/// Checkout session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Payment => "payment",
            CheckoutMode::Subscription => "subscription",
        }
    }
}

impl fmt::Display for CheckoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing interval of a recurring price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Month,
    Year,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Month => "month",
            Interval::Year => "year",
        }
    }
}

/// Inline price definition
#[derive(Debug, Clone, PartialEq)]
pub struct PriceData {
    /// ISO currency code, lowercase
    pub currency: String,

    /// Amount in the smallest currency unit (cents)
    pub unit_amount: i64,

    pub product_name: String,
    pub product_description: Option<String>,

    /// `None` for one-time payments
    pub recurring: Option<Interval>,
}

impl PriceData {
    /// One-time USD price
    pub fn one_time(unit_amount: i64, product_name: impl Into<String>) -> Self {
        Self {
            currency: "usd".to_string(),
            unit_amount,
            product_name: product_name.into(),
            product_description: None,
            recurring: None,
        }
    }

    /// Recurring USD price
    pub fn recurring(unit_amount: i64, product_name: impl Into<String>, interval: Interval) -> Self {
        Self {
            recurring: Some(interval),
            ..Self::one_time(unit_amount, product_name)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.product_description = Some(description.into());
        self
    }
}

/// What a checkout line item charges for
#[derive(Debug, Clone, PartialEq)]
pub enum LineItemPrice {
    /// A price object created beforehand
    Existing(String),

    /// A price defined inline with the session
    Inline(PriceData),
}

/// A checkout line item
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub price: LineItemPrice,
    pub quantity: u32,
}

impl LineItem {
    pub fn existing(price_id: impl Into<String>) -> Self {
        Self {
            price: LineItemPrice::Existing(price_id.into()),
            quantity: 1,
        }
    }

    pub fn inline(price: PriceData) -> Self {
        Self {
            price: LineItemPrice::Inline(price),
            quantity: 1,
        }
    }
}

/// Parameters for a new checkout session
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub mode: CheckoutMode,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,

    /// Copied onto the subscription created by a subscription-mode session
    pub subscription_metadata: BTreeMap<String, String>,

    pub allow_promotion_codes: bool,
}

impl CheckoutRequest {
    pub fn new(mode: CheckoutMode, success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        Self {
            mode,
            line_items: Vec::new(),
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
            customer: None,
            customer_email: None,
            metadata: BTreeMap::new(),
            subscription_metadata: BTreeMap::new(),
            allow_promotion_codes: false,
        }
    }

    pub fn with_line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Customer object
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Price object
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
}

/// Checkout session object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    /// Whether the provider reports the session as paid
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Non-empty metadata value
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// One item of a subscription
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionItem {
    pub id: String,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

/// Subscription object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Subscription {
    /// Billing period as `(start, end)` unix timestamps
    ///
    /// Newer API versions report the period per item, so fall back to the
    /// first item when the subscription itself carries none.
    pub fn period(&self) -> (Option<i64>, Option<i64>) {
        let first = self.items.data.first();
        (
            self.current_period_start
                .or_else(|| first.and_then(|item| item.current_period_start)),
            self.current_period_end
                .or_else(|| first.and_then(|item| item.current_period_end)),
        )
    }

    /// Id of the most recently added item
    pub fn last_item_id(&self) -> Option<&str> {
        self.items.data.last().map(|item| item.id.as_str())
    }
}

/// Operations the service needs from the payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a customer with the given e-mail and metadata
    async fn create_customer(
        &self,
        email: &str,
        metadata: &BTreeMap<String, String>,
    ) -> PaymentResult<Customer>;

    /// Finds the first customer registered with `email`
    async fn find_customer_by_email(&self, email: &str) -> PaymentResult<Option<Customer>>;

    /// Creates a standalone price
    async fn create_price(&self, price: &PriceData) -> PaymentResult<Price>;

    /// Opens a hosted checkout session
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> PaymentResult<CheckoutSession>;

    /// Re-reads a checkout session
    async fn retrieve_checkout_session(&self, session_id: &str) -> PaymentResult<CheckoutSession>;

    /// Re-reads a subscription
    async fn retrieve_subscription(&self, subscription_id: &str) -> PaymentResult<Subscription>;

    /// Cancels a subscription immediately
    async fn cancel_subscription(&self, subscription_id: &str) -> PaymentResult<Subscription>;

    /// Lets a subscription run until the end of the paid period
    async fn cancel_at_period_end(&self, subscription_id: &str) -> PaymentResult<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_deserializes_with_missing_fields() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_test_1",
            "payment_status": "paid",
            "metadata": {"user_id": "42", "custom_product_count": ""}
        }))
        .unwrap();

        assert!(session.is_paid());
        assert_eq!(session.metadata_value("user_id"), Some("42"));
        assert_eq!(session.metadata_value("custom_product_count"), None);
        assert!(session.subscription.is_none());
    }

    #[test]
    fn test_subscription_period_falls_back_to_items() {
        let subscription: Subscription = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "items": {"data": [
                {"id": "si_1", "current_period_start": 100, "current_period_end": 200},
                {"id": "si_2"}
            ]}
        }))
        .unwrap();

        assert_eq!(subscription.period(), (Some(100), Some(200)));
        assert_eq!(subscription.last_item_id(), Some("si_2"));
    }

    #[test]
    fn test_recurring_price_keeps_currency() {
        let price = PriceData::recurring(500, "Server 1 Premium", Interval::Month);
        assert_eq!(price.currency, "usd");
        assert_eq!(price.recurring, Some(Interval::Month));
    }
}
