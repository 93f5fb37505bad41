/// Discord server premium
///
/// A guild owner buys premium for one Discord server through a subscription
/// checkout. The provider then reports the subscription lifecycle to the
/// webhook, which keeps the server premium procedures in sync:
///
/// ```text
/// customer.subscription.created  -> add_server_premium, then status refresh
/// customer.subscription.updated  -> update_server_premium
/// customer.subscription.deleted  -> delete_server_premium
/// ```

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::unix_now,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stockwatch_shared::{
    db::row::ProcOutcome,
    models::subscription::server::{self, ServerPremium},
    payments::{
        provider::{CheckoutMode, CheckoutRequest, Interval, LineItem, PriceData, Subscription},
        webhook::{construct_event, Event, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER},
    },
};

/// Server premium checkout request
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerCheckoutRequest {
    pub amount: String,

    #[serde(rename = "serverID")]
    pub server_id: String,
}

/// Server premium checkout response
#[derive(Debug, Serialize)]
pub struct ServerCheckoutResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Billing options keyed by the amount the client sends, in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPlan {
    Monthly,
    Yearly,
}

impl ServerPlan {
    pub fn from_amount(amount: &str) -> Option<Self> {
        match amount {
            "500" => Some(ServerPlan::Monthly),
            "5000" => Some(ServerPlan::Yearly),
            _ => None,
        }
    }

    pub fn cents(&self) -> i64 {
        match self {
            ServerPlan::Monthly => 500,
            ServerPlan::Yearly => 5_000,
        }
    }

    pub fn interval(&self) -> Interval {
        match self {
            ServerPlan::Monthly => Interval::Month,
            ServerPlan::Yearly => Interval::Year,
        }
    }

    /// Value stored as `subscription_type`
    pub fn subscription_type(&self) -> &'static str {
        match self {
            ServerPlan::Monthly => "monthly",
            ServerPlan::Yearly => "yearly",
        }
    }
}

/// Checkout for one server; the server id and plan travel in both the
/// session and the subscription metadata
pub fn server_checkout(
    plan: ServerPlan,
    server_id: &str,
    success_url: &str,
    cancel_url: &str,
) -> CheckoutRequest {
    let mut checkout = CheckoutRequest::new(CheckoutMode::Subscription, success_url, cancel_url)
        .with_line_item(LineItem::inline(PriceData::recurring(
            plan.cents(),
            format!("Server {} Premium", server_id),
            plan.interval(),
        )))
        .with_metadata("server_id", server_id)
        .with_metadata("subscription_type", plan.subscription_type());

    checkout.subscription_metadata = checkout.metadata.clone();
    checkout.allow_promotion_codes = true;
    checkout
}

/// Opens a server premium checkout
///
/// # Endpoint
///
/// ```text
/// POST /api/stripe/request
/// { "amount": "500", "serverID": "123456789" }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Unknown amount, missing server id, or the provider refused the checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<ServerCheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<ServerCheckoutResponse>> {
    let Json(req) = payload?;

    let plan = ServerPlan::from_amount(req.amount.trim()).ok_or_else(|| {
        ApiError::BadRequest(format!("Invalid subscription amount of {}", req.amount))
    })?;

    let server_id = req.server_id.trim();
    if server_id.is_empty() {
        return Err(ApiError::BadRequest("Server ID is required".to_string()));
    }

    let payments = &state.config.payments;
    let checkout = server_checkout(
        plan,
        server_id,
        &payments.server_success_url,
        &payments.server_cancel_url,
    );

    let session = state
        .payments
        .create_checkout_session(&checkout)
        .await
        .map_err(|e| {
            tracing::error!(server_id, error = %e, "Server premium checkout failed");
            ApiError::BadRequest("Payment processing error".to_string())
        })?;

    if session.id.is_empty() {
        return Err(ApiError::BadRequest(
            "Failed to create checkout session".to_string(),
        ));
    }

    tracing::info!(
        server_id,
        subscription_type = plan.subscription_type(),
        session_id = %session.id,
        "Server premium checkout created"
    );

    Ok(Json(ServerCheckoutResponse {
        session_id: session.id,
    }))
}

/// Subscription lifecycle events for server premium
///
/// # Errors
///
/// - `400 Bad Request`: Unverifiable signature or unreadable payload
/// - `500 Internal Server Error`: A procedure returned nothing or a non-success status
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

    apply_event(&state, &event).await?;

    Ok(Json(json!({ "status": "success" })))
}

async fn apply_event(state: &AppState, event: &Event) -> ApiResult<()> {
    match event.event_type.as_str() {
        "customer.subscription.created" => {
            let subscription: Subscription = event.object_as()?;
            let premium = premium_from(&subscription);

            require_success(server::add(state.db(), &premium).await?)?;
            tracing::info!(
                server_id = ?premium.server_id,
                subscription_id = %subscription.id,
                "Server premium added"
            );

            let status = server::refresh_status(state.db(), premium.server_id).await?;
            tracing::debug!(server_id = ?premium.server_id, rows = status.len(), "Premium status refreshed");
        }
        "customer.subscription.updated" => {
            let subscription: Subscription = event.object_as()?;
            let premium = premium_from(&subscription);

            require_success(server::update(state.db(), &premium).await?)?;
            tracing::info!(subscription_id = %subscription.id, status = ?premium.status, "Server premium updated");
        }
        "customer.subscription.deleted" => {
            let subscription: Subscription = event.object_as()?;

            require_success(server::delete(state.db(), &subscription.id).await?)?;
            tracing::info!(subscription_id = %subscription.id, "Server premium removed");
        }
        other => {
            tracing::debug!(event_type = other, "Ignoring event");
        }
    }

    Ok(())
}

fn premium_from(subscription: &Subscription) -> ServerPremium<'_> {
    ServerPremium {
        server_id: subscription.metadata.get("server_id").map(String::as_str),
        subscription_type: subscription
            .metadata
            .get("subscription_type")
            .map(String::as_str),
        provider_subscription_id: &subscription.id,
        status: subscription.status.as_deref(),
        expires_at: subscription.period().1,
    }
}

/// Webhook deliveries are retried by the provider, so procedure failures answer 500
fn require_success(outcome: Option<ProcOutcome>) -> ApiResult<()> {
    match outcome {
        None => Err(ApiError::server("No results returned")),
        Some(outcome) if !outcome.is_success() => Err(ApiError::server(outcome.message)),
        Some(_) => Ok(()),
    }
}
