/// Premium subscription endpoints
///
/// Plan limits and subscription state live in the database; this module
/// only forwards procedure answers. Checkout and cancellation talk to the
/// payment provider through [`PaymentProvider`](stockwatch_shared::payments::PaymentProvider).
///
/// # Checkout flow
///
/// ```text
/// create-checkout-session ──> provider checkout page ──> process-success
///        (line items)                                     (re-reads session and
///                                                          subscription, persists)
/// ```
///
/// Amounts are never taken from the client on the way back: process-success
/// re-reads everything from the provider.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{caller_id, unix_now},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use stockwatch_shared::{
    auth::middleware::AuthContext,
    models::{
        subscription::{
            self, CatalogLookup, LimitCheck, LimitLookup, NewSubscription, PlanCatalog,
            SubscriptionInfo, SubscriptionLookup, AI_ADDON_NAME,
        },
        user,
    },
    payments::{
        provider::{CheckoutMode, CheckoutRequest, Interval, LineItem, PriceData},
        webhook::{construct_event, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER},
        PaymentError,
    },
};

/// Monthly price per product on the pay-as-you-go plan, in cents
pub const PAY_AS_YOU_GO_CENTS_PER_PRODUCT: i64 = 500;

/// Monthly price of the unlimited plan, in cents
pub const UNLIMITED_CENTS: i64 = 14_500;

/// Monthly price of the AI add-on, in cents
pub const AI_ADDON_CENTS: i64 = 5_000;

/// Customer e-mail used when the user record has none
const FALLBACK_CUSTOMER_EMAIL: &str = "user@example.com";

/// `{"subscription": ..}` body
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: SubscriptionInfo,
}

/// Checkout request
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutSessionRequest {
    pub plan_type: Option<String>,
    pub custom_product_count: Option<i64>,
    pub include_ai_enhancement: bool,
}

/// Checkout response
#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub checkout_url: Option<String>,
    pub session_id: String,
}

/// Body carrying a checkout session id
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionRequest {
    pub session_id: Option<String>,
}

/// Result of process-success; `warnings` lists secondary steps that failed
#[derive(Debug, Serialize)]
pub struct ProcessSuccessResponse {
    pub message: String,
    pub subscription_id: Option<i64>,
    pub warnings: Vec<String>,
}

/// Cancel request
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    pub cancel_immediately: bool,
}

/// Result of a cancellation; `warnings` reports a failed provider call
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub message: String,
    pub warnings: Vec<String>,
}

/// Subscription tiers a checkout can be opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanType {
    PayAsYouGo,
    Unlimited,
}

impl PlanType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pay_as_you_go" => Some(PlanType::PayAsYouGo),
            "unlimited" => Some(PlanType::Unlimited),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::PayAsYouGo => "pay_as_you_go",
            PlanType::Unlimited => "unlimited",
        }
    }
}

/// Monthly prices for a checkout, plan first and add-on last
///
/// # Errors
///
/// - `400 Bad Request`: Missing or unknown plan, or a pay-as-you-go count below one
pub fn checkout_prices(req: &CheckoutSessionRequest) -> ApiResult<(PlanType, Vec<PriceData>)> {
    let plan_type = req
        .plan_type
        .as_deref()
        .filter(|plan| !plan.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Plan type is required".to_string()))?;

    let plan = PlanType::parse(plan_type)
        .ok_or_else(|| ApiError::BadRequest("Invalid plan type".to_string()))?;

    let mut prices = Vec::with_capacity(2);

    match plan {
        PlanType::PayAsYouGo => {
            let count = req.custom_product_count.filter(|count| *count >= 1).ok_or_else(|| {
                ApiError::BadRequest("Product count is required for pay-as-you-go plan".to_string())
            })?;

            prices.push(
                PriceData::recurring(
                    count * PAY_AS_YOU_GO_CENTS_PER_PRODUCT,
                    format!("Pay-as-you-go Plan ({} products)", count),
                    Interval::Month,
                )
                .with_description(format!("Track up to {} products", count)),
            );
        }
        PlanType::Unlimited => prices.push(
            PriceData::recurring(UNLIMITED_CENTS, "Unlimited Access Plan", Interval::Month)
                .with_description("Track unlimited products"),
        ),
    }

    if req.include_ai_enhancement {
        prices.push(
            PriceData::recurring(AI_ADDON_CENTS, "AI Enhancement Add-on", Interval::Month)
                .with_description("Advanced AI-powered tracking with multiple failsafe layers"),
        );
    }

    Ok((plan, prices))
}

/// Provider period timestamp as a local datetime
fn local_datetime(timestamp: Option<i64>) -> Option<NaiveDateTime> {
    timestamp
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|utc| utc.with_timezone(&Local).naive_local())
}

/// Current subscription, or the free plan when the user has none
pub async fn subscription(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<SubscriptionResponse>> {
    let user_id = caller_id(&auth)?;

    let lookup = subscription::info_for_user(state.db(), user_id)
        .await
        .map_err(|e| ApiError::from(e).or_public("Failed to load subscription information"))?;

    match lookup {
        SubscriptionLookup::Found(subscription) => Ok(Json(SubscriptionResponse { subscription })),
        SubscriptionLookup::Rejected(message) => Err(ApiError::BadRequest(message)),
    }
}

/// Whether the caller may add another product
///
/// The answer of `check_product_limit` is returned unchanged.
pub async fn check_limit(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<LimitCheck>> {
    let user_id = caller_id(&auth)?;
    let public = "Failed to check product limit";

    match subscription::check_product_limit(state.db(), user_id)
        .await
        .map_err(|e| ApiError::from(e).or_public(public))?
    {
        LimitLookup::Checked(check) => Ok(Json(check)),
        LimitLookup::Rejected(message) => Err(ApiError::BadRequest(message)),
        LimitLookup::Empty => Err(ApiError::server(public)),
    }
}

/// Plans and add-ons on offer
pub async fn plans(State(state): State<AppState>) -> ApiResult<Json<PlanCatalog>> {
    let public = "Failed to load subscription plans";

    match subscription::plan_catalog(state.db())
        .await
        .map_err(|e| ApiError::from(e).or_public(public))?
    {
        CatalogLookup::Found(catalog) => Ok(Json(catalog)),
        CatalogLookup::Rejected(message) => Err(ApiError::BadRequest(message)),
        CatalogLookup::Empty => Err(ApiError::server(public)),
    }
}

/// Opens a subscription checkout
///
/// # Endpoint
///
/// ```text
/// POST /api/premium/create-checkout-session
/// { "plan_type": "pay_as_you_go", "custom_product_count": 10, "include_ai_enhancement": true }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Invalid plan selection, or the provider refused a call
/// - `500 Internal Server Error`: No customer could be created or found
pub async fn create_checkout_session(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<CheckoutSessionRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutSessionResponse>> {
    let user_id = caller_id(&auth)?;
    let Json(req) = payload?;

    let (plan, prices) = checkout_prices(&req)?;

    open_checkout(&state, user_id, &req, plan, prices)
        .await
        .map_err(|e| e.or_public("Failed to create checkout session"))
}

async fn open_checkout(
    state: &AppState,
    user_id: i64,
    req: &CheckoutSessionRequest,
    plan: PlanType,
    prices: Vec<PriceData>,
) -> ApiResult<Json<CheckoutSessionResponse>> {
    let payment_error = |e: PaymentError| {
        tracing::error!(user_id, error = %e, "Payment provider error during checkout");
        ApiError::BadRequest("Payment processing error".to_string())
    };

    let email = user::find_by_id(state.db(), user_id)
        .await?
        .map(|profile| profile.email)
        .filter(|email| !email.is_empty())
        .unwrap_or_else(|| FALLBACK_CUSTOMER_EMAIL.to_string());

    let customer_metadata = BTreeMap::from([("user_id".to_string(), user_id.to_string())]);

    let customer = match state.payments.create_customer(&email, &customer_metadata).await {
        Ok(customer) => customer,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Customer creation failed, looking up existing customer");
            state
                .payments
                .find_customer_by_email(&email)
                .await
                .map_err(payment_error)?
                .ok_or_else(|| ApiError::server("Failed to create Stripe customer"))?
        }
    };

    let base = state.config.public_url("dashboard/premium");
    let mut checkout = CheckoutRequest::new(
        CheckoutMode::Subscription,
        format!("{}?session_id={{CHECKOUT_SESSION_ID}}", base),
        base,
    )
    .with_metadata("user_id", user_id.to_string())
    .with_metadata("plan_type", plan.as_str())
    .with_metadata(
        "custom_product_count",
        req.custom_product_count
            .map(|count| count.to_string())
            .unwrap_or_default(),
    )
    .with_metadata(
        "include_ai_enhancement",
        if req.include_ai_enhancement { "True" } else { "False" },
    );
    checkout.customer = Some(customer.id);

    for price in &prices {
        let created = state.payments.create_price(price).await.map_err(payment_error)?;
        checkout = checkout.with_line_item(LineItem::existing(created.id));
    }

    let session = state
        .payments
        .create_checkout_session(&checkout)
        .await
        .map_err(payment_error)?;

    tracing::info!(user_id, plan = plan.as_str(), session_id = %session.id, "Checkout session created");

    Ok(Json(CheckoutSessionResponse {
        checkout_url: session.url,
        session_id: session.id,
    }))
}

/// Persists the subscription bought in a completed checkout
///
/// Recording the AI add-on is a secondary step: a failure there is
/// reported in `warnings` and does not fail the request.
///
/// # Errors
///
/// - `400 Bad Request`: Missing session id, unpaid session, provider refusal, or procedure rejection
/// - `500 Internal Server Error`: The subscription could not be stored
pub async fn process_success(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> ApiResult<Json<ProcessSuccessResponse>> {
    let user_id = caller_id(&auth)?;
    let session_id = payload
        .ok()
        .and_then(|Json(req)| req.session_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Session ID is required".to_string()))?;

    record_subscription(&state, user_id, &session_id)
        .await
        .map_err(|e| e.or_public("Failed to process subscription"))
}

async fn record_subscription(
    state: &AppState,
    user_id: i64,
    session_id: &str,
) -> ApiResult<Json<ProcessSuccessResponse>> {
    let payment_error = |e: PaymentError| {
        tracing::error!(user_id, session_id, error = %e, "Payment provider error while verifying checkout");
        ApiError::BadRequest("Payment verification error".to_string())
    };

    let session = state
        .payments
        .retrieve_checkout_session(session_id)
        .await
        .map_err(payment_error)?;

    if !session.is_paid() {
        return Err(ApiError::BadRequest("Payment was not successful".to_string()));
    }

    let provider_subscription_id = session.subscription.as_deref().ok_or_else(|| {
        tracing::warn!(user_id, session_id, "Paid session carries no subscription");
        ApiError::BadRequest("Payment was not successful".to_string())
    })?;

    let provider_subscription = state
        .payments
        .retrieve_subscription(provider_subscription_id)
        .await
        .map_err(payment_error)?;

    let custom_product_limit = session
        .metadata_value("custom_product_count")
        .and_then(|count| count.parse::<i64>().ok());
    let include_ai = session.metadata_value("include_ai_enhancement") == Some("True");
    let (period_start, period_end) = provider_subscription.period();

    let created = subscription::create(
        state.db(),
        user_id,
        NewSubscription {
            plan_type: session.metadata_value("plan_type"),
            custom_product_limit,
            provider_customer_id: session.customer.as_deref(),
            provider_subscription_id: &provider_subscription.id,
            checkout_session_id: session_id,
            period_start: local_datetime(period_start),
            period_end: local_datetime(period_end),
        },
    )
    .await?
    .ok_or_else(|| ApiError::server("Failed to create subscription"))?;

    if !created.outcome.is_success() {
        return Err(ApiError::BadRequest(created.outcome.message));
    }

    let mut warnings = Vec::new();

    if let (true, Some(subscription_id)) = (include_ai, created.subscription_id) {
        let recorded = subscription::add_addon(
            state.db(),
            subscription_id,
            AI_ADDON_NAME,
            provider_subscription.last_item_id(),
        )
        .await;

        match recorded {
            Ok(Some(outcome)) if outcome.is_success() => {}
            Ok(Some(outcome)) => {
                tracing::warn!(user_id, subscription_id, message = %outcome.message, "AI add-on was not recorded");
                warnings.push(format!("AI Enhancement add-on was not recorded: {}", outcome.message));
            }
            Ok(None) => {
                tracing::warn!(user_id, subscription_id, "AI add-on procedure returned no rows");
                warnings.push("AI Enhancement add-on was not recorded".to_string());
            }
            Err(e) => {
                tracing::error!(user_id, subscription_id, error = %e, "Failed to record AI add-on");
                warnings.push("AI Enhancement add-on was not recorded".to_string());
            }
        }
    }

    tracing::info!(
        user_id,
        subscription_id = ?created.subscription_id,
        provider_subscription_id = %provider_subscription.id,
        "Subscription created"
    );

    Ok(Json(ProcessSuccessResponse {
        message: "Subscription created successfully".to_string(),
        subscription_id: created.subscription_id,
        warnings,
    }))
}

/// Cancels the caller's subscription
///
/// The provider is asked first (immediate delete or cancel at period end).
/// Its failure is reported in `warnings`; the local status is updated either way.
pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Option<Json<CancelRequest>>,
) -> ApiResult<Json<CancelResponse>> {
    let user_id = caller_id(&auth)?;
    let cancel_immediately = payload.map(|Json(req)| req.cancel_immediately).unwrap_or(false);

    cancel_subscription(&state, user_id, cancel_immediately)
        .await
        .map_err(|e| e.or_public("Failed to cancel subscription"))
}

async fn cancel_subscription(
    state: &AppState,
    user_id: i64,
    cancel_immediately: bool,
) -> ApiResult<Json<CancelResponse>> {
    let mut warnings = Vec::new();

    if let Some(provider_id) =
        subscription::stored_provider_subscription_id(state.db(), user_id).await?
    {
        let cancelled = if cancel_immediately {
            state.payments.cancel_subscription(&provider_id).await
        } else {
            state.payments.cancel_at_period_end(&provider_id).await
        };

        if let Err(e) = cancelled {
            tracing::error!(user_id, provider_subscription_id = %provider_id, error = %e, "Provider cancellation failed");
            warnings.push("Payment provider cancellation failed; the subscription was cancelled locally".to_string());
        }
    }

    let outcome = subscription::cancel(state.db(), user_id, cancel_immediately)
        .await?
        .ok_or_else(|| ApiError::server("Failed to cancel subscription"))?;

    if !outcome.is_success() {
        return Err(ApiError::BadRequest(outcome.message));
    }

    tracing::info!(user_id, cancel_immediately, "Subscription cancelled");

    Ok(Json(CancelResponse {
        message: outcome.message,
        warnings,
    }))
}

/// Plan changes are not offered yet
pub async fn update(
    auth: AuthContext,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    caller_id(&auth)?;
    let Json(body) = payload?;

    let empty = match &body {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if empty {
        return Err(ApiError::BadRequest("No data provided".to_string()));
    }

    Err(ApiError::NotImplemented(
        "Subscription update functionality not yet implemented".to_string(),
    ))
}

/// Signed subscription events from the payment provider
///
/// Events are verified and logged; subscription state is written by
/// process-success and cancel.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let event = construct_event(
        &body,
        signature,
        &state.config.payments.webhook_secret,
        DEFAULT_TOLERANCE_SECS,
        unix_now(),
    )?;

    let object_id = event.object_str("id").unwrap_or_default();

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            tracing::info!(session_id = object_id, "Checkout session completed");
        }
        "customer.subscription.updated" => {
            tracing::info!(subscription_id = object_id, "Subscription updated");
        }
        "customer.subscription.deleted" => {
            tracing::info!(subscription_id = object_id, "Subscription cancelled");
        }
        "invoice.payment_failed" => {
            tracing::warn!(invoice_id = object_id, "Invoice payment failed");
        }
        other => {
            tracing::debug!(event_type = other, "Unhandled event type");
        }
    }

    Ok(Json(json!({ "status": "success" })))
}
