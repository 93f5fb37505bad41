/// One-time donations
///
/// A donation is recorded once the provider reports its checkout session as
/// paid. That can be seen twice, by the success redirect and by the
/// webhook; both save under the same session id.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::unix_now,
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stockwatch_shared::{
    auth::middleware::AuthContext,
    models::donation::{self, DonationRecord, NewDonation, STATUS_FAILED},
    payments::{
        provider::{CheckoutMode, CheckoutRequest, CheckoutSession, LineItem, PriceData},
        webhook::{construct_event, Event, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER},
    },
};

/// Metadata marker distinguishing donations from subscription checkouts
pub const DONATION_TYPE: &str = "one_time";

/// Donation checkout request; `amount` is in whole dollars
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DonationRequest {
    pub amount: Option<Value>,
    pub name: String,
    pub email: String,
}

/// Donation checkout response
#[derive(Debug, Serialize)]
pub struct DonationSessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub url: Option<String>,
}

/// Success redirect query
#[derive(Debug, Default, Deserialize)]
pub struct SuccessQuery {
    pub session_id: Option<String>,
}

/// Success page data
#[derive(Debug, Serialize)]
pub struct DonationSuccessResponse {
    pub message: String,
    pub amount: f64,
    pub donor_name: String,
}

/// Webhook acknowledgement; `warnings` lists bookkeeping that did not apply
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Admin listing
#[derive(Debug, Serialize)]
pub struct DonationListResponse {
    pub status: &'static str,
    pub donations: Vec<DonationRecord>,
    pub total_donations: usize,
    pub total_amount: f64,
}

/// Whole-dollar amount from a JSON number or numeric string
pub fn donation_dollars(amount: Option<&Value>) -> ApiResult<i64> {
    let invalid = || ApiError::BadRequest("Donation amount must be a whole number".to_string());

    let dollars = match amount {
        Some(Value::Number(n)) => n.as_i64().ok_or_else(invalid)?,
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(ApiError::BadRequest("Donation amount is required".to_string())),
    };

    if dollars < 1 {
        return Err(ApiError::BadRequest(
            "Donation amount must be at least $1".to_string(),
        ));
    }

    Ok(dollars)
}

/// One-time payment checkout for a donation
pub fn donation_checkout(
    dollars: i64,
    donor_name: &str,
    donor_email: &str,
    success_url: &str,
    cancel_url: &str,
) -> CheckoutRequest {
    let mut checkout = CheckoutRequest::new(CheckoutMode::Payment, success_url, cancel_url)
        .with_line_item(LineItem::inline(
            PriceData::one_time(dollars * 100, "Donation to StockWatch")
                .with_description("Supporting price and stock tracking for everyone"),
        ))
        .with_metadata("donor_name", donor_name)
        .with_metadata("donor_email", donor_email)
        .with_metadata("donation_amount", dollars.to_string())
        .with_metadata("donation_type", DONATION_TYPE);

    checkout.customer_email = Some(donor_email.to_string()).filter(|email| !email.is_empty());
    checkout.allow_promotion_codes = true;
    checkout
}

/// Whether a checkout session belongs to a donation
fn is_donation(session: &CheckoutSession) -> bool {
    session.mode.as_deref() == Some(CheckoutMode::Payment.as_str())
        && session.metadata_value("donation_type") == Some(DONATION_TYPE)
}

/// Saves a paid donation session; returns the donor name and amount recorded
async fn save_paid_session(state: &AppState, session: &CheckoutSession) -> ApiResult<(String, f64)> {
    let donor_name = session
        .metadata_value("donor_name")
        .unwrap_or("Anonymous")
        .to_string();
    let amount = session
        .metadata_value("donation_amount")
        .and_then(|amount| amount.parse::<f64>().ok())
        .unwrap_or(0.0);

    let outcome = donation::save(
        state.db(),
        &NewDonation {
            session_id: &session.id,
            donor_name: &donor_name,
            donor_email: session.metadata_value("donor_email").unwrap_or_default(),
            amount,
            payment_intent: session.payment_intent.as_deref(),
        },
    )
    .await?;

    match outcome {
        None => Err(ApiError::server("No results returned")),
        Some(outcome) if !outcome.is_success() => Err(ApiError::server(outcome.message)),
        Some(_) => {
            tracing::info!(session_id = %session.id, amount, "Donation recorded");
            Ok((donor_name, amount))
        }
    }
}

/// Opens a donation checkout
///
/// # Endpoint
///
/// ```text
/// POST /api/donation/create-session
/// { "amount": 25, "name": "Grace", "email": "grace@example.com" }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Amount missing, fractional or below $1, or the provider refused the checkout
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<DonationRequest>, JsonRejection>,
) -> ApiResult<Json<DonationSessionResponse>> {
    let Json(req) = payload?;
    let dollars = donation_dollars(req.amount.as_ref())?;

    let success_url = format!(
        "{}?session_id={{CHECKOUT_SESSION_ID}}",
        state.config.public_url("api/donation/success")
    );
    let cancel_url = state.config.public_url("donations");

    let checkout = donation_checkout(
        dollars,
        req.name.trim(),
        req.email.trim(),
        &success_url,
        &cancel_url,
    );

    let session = state
        .payments
        .create_checkout_session(&checkout)
        .await
        .map_err(|e| {
            tracing::error!(dollars, error = %e, "Donation checkout failed");
            ApiError::BadRequest("Payment processing error".to_string())
        })?;

    if session.id.is_empty() {
        return Err(ApiError::BadRequest(
            "Failed to create checkout session".to_string(),
        ));
    }

    Ok(Json(DonationSessionResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Confirms a donation after the provider redirects back
///
/// # Errors
///
/// - `400 Bad Request`: Missing session id, unpaid session, or the provider refused the lookup
/// - `500 Internal Server Error`: The donation could not be saved
pub async fn success(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> ApiResult<Json<DonationSuccessResponse>> {
    let session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Session ID is required".to_string()))?;

    let session = state
        .payments
        .retrieve_checkout_session(session_id.trim())
        .await
        .map_err(|e| {
            tracing::error!(session_id = %session_id, error = %e, "Could not read donation session");
            ApiError::BadRequest("Payment verification error".to_string())
        })?;

    if !session.is_paid() {
        return Err(ApiError::BadRequest("Payment was not successful".to_string()));
    }

    let (donor_name, amount) = save_paid_session(&state, &session)
        .await
        .map_err(|e| e.or_public("Error processing donation"))?;

    Ok(Json(DonationSuccessResponse {
        message: "Thank you for your donation!".to_string(),
        amount,
        donor_name,
    }))
}

/// Donation events from the payment provider
///
/// # Errors
///
/// - `400 Bad Request`: Unverifiable signature or unreadable payload
/// - `500 Internal Server Error`: A completed donation could not be saved
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
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

    let warnings = apply_event(&state, &event).await?;

    Ok(Json(WebhookResponse {
        status: "success",
        warnings,
    }))
}

async fn apply_event(state: &AppState, event: &Event) -> ApiResult<Vec<String>> {
    let mut warnings = Vec::new();

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSession = event.object_as()?;
            if is_donation(&session) {
                save_paid_session(state, &session).await?;
            }
        }
        "checkout.session.async_payment_failed" => {
            let session: CheckoutSession = event.object_as()?;
            if is_donation(&session) {
                match donation::update_status(state.db(), &session.id, STATUS_FAILED).await {
                    Ok(Some(outcome)) if outcome.is_success() => {
                        tracing::info!(session_id = %session.id, "Donation marked failed");
                    }
                    Ok(outcome) => {
                        let message = outcome.map(|o| o.message).unwrap_or_default();
                        tracing::warn!(session_id = %session.id, message = %message, "Donation status not updated");
                        warnings.push(format!("Donation status was not updated: {}", message));
                    }
                    Err(e) => {
                        tracing::error!(session_id = %session.id, error = %e, "Donation status update failed");
                        warnings.push("Donation status was not updated".to_string());
                    }
                }
            }
        }
        other => {
            tracing::debug!(event_type = other, "Ignoring event");
        }
    }

    Ok(warnings)
}

/// All donations with totals; completed donations count towards the amount
pub async fn list_donations(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> ApiResult<Json<DonationListResponse>> {
    let summary = donation::list_all(state.db())
        .await
        .map_err(|e| ApiError::from(e).or_public("Failed to load donations"))?;

    Ok(Json(DonationListResponse {
        status: "success",
        donations: summary.donations,
        total_donations: summary.total_donations,
        total_amount: summary.total_amount,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn message(result: ApiResult<i64>) -> String {
        match result {
            Err(ApiError::BadRequest(message)) => message,
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[test]
    fn test_donation_amounts() {
        assert_eq!(donation_dollars(Some(&json!(25))).unwrap(), 25);
        assert_eq!(donation_dollars(Some(&json!("10"))).unwrap(), 10);
        assert_eq!(message(donation_dollars(Some(&json!(0)))), "Donation amount must be at least $1");
        assert_eq!(message(donation_dollars(Some(&json!(2.5)))), "Donation amount must be a whole number");
        assert_eq!(message(donation_dollars(None)), "Donation amount is required");
    }

    #[test]
    fn test_donation_checkout() {
        let checkout = donation_checkout(25, "Grace", "", "https://a/ok", "https://a/no");

        assert_eq!(checkout.mode, CheckoutMode::Payment);
        assert_eq!(checkout.customer_email, None);
        assert_eq!(checkout.metadata.get("donation_amount").map(String::as_str), Some("25"));
        assert_eq!(checkout.metadata.get("donation_type").map(String::as_str), Some(DONATION_TYPE));
        assert_eq!(checkout.line_items.len(), 1);
    }

    #[test]
    fn test_only_one_time_payments_are_donations() {
        let mut session = CheckoutSession {
            id: "cs_1".into(),
            mode: Some("payment".into()),
            metadata: HashMap::from([("donation_type".to_string(), DONATION_TYPE.to_string())]),
            ..Default::default()
        };
        assert!(is_donation(&session));

        session.mode = Some("subscription".into());
        assert!(!is_donation(&session));

        session.mode = Some("payment".into());
        session.metadata.clear();
        assert!(!is_donation(&session));
    }
}
