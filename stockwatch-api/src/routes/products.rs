/// Tracked product endpoints
///
/// All routes require an access token; the caller's id comes from the token
/// subject and scopes every procedure call.
///
/// # Endpoints
///
/// ```text
/// GET    /api/products        list
/// POST   /api/products        add (201)
/// PUT    /api/products/:id    update alerts / notification channel
/// DELETE /api/products/:id    delete
/// ```

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{caller_id, first_validation_error},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use stockwatch_shared::{
    auth::middleware::AuthContext,
    models::{
        product::{self, NewProduct, ProductListing, ProductUpdate, TrackedProduct},
        subscription::{self, LimitCheck, LimitLookup},
    },
};
use validator::{Validate, ValidationError};

/// Add-product request
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct AddProductRequest {
    #[validate(custom(function = "product_url_rule"))]
    pub url: String,

    pub title: String,

    #[validate(custom(function = "optional_webhook_rule"))]
    pub discord_webhook_url: String,

    pub sms_notifications_enabled: bool,
}

impl AddProductRequest {
    fn normalized(mut self) -> Self {
        self.url = self.url.trim().to_string();
        self.title = self.title.trim().to_string();
        self.discord_webhook_url = self.discord_webhook_url.trim().to_string();
        self
    }

    /// Title to store; derived from the store domain when none was given
    fn title_or_default(&self) -> String {
        if self.title.is_empty() {
            product::store_info(&self.url).1
        } else {
            self.title.clone()
        }
    }
}

/// Update-product request; alert thresholds may arrive as numbers or numeric strings
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateProductRequest {
    pub min_price_alert: Option<Value>,
    pub max_price_alert: Option<Value>,
    pub discord_webhook_url: Option<String>,
    pub sms_notifications_enabled: Option<bool>,
}

/// Product listing
#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub products: Vec<TrackedProduct>,
    pub total_count: usize,
}

/// Add-product response
#[derive(Debug, Serialize)]
pub struct AddProductResponse {
    pub message: String,
    pub product_id: Option<i64>,
}

/// `{"message": ..}` body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn rule_error(code: &'static str, message: &str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Owned(message.to_string()));
    error
}

fn product_url_rule(url: &str) -> Result<(), ValidationError> {
    if url.is_empty() {
        return Err(rule_error("required", "Product URL is required"));
    }
    if !product::is_valid_product_url(url) {
        return Err(rule_error("url", "Invalid URL format"));
    }
    Ok(())
}

/// Blank is allowed; anything else must be a Discord webhook
fn optional_webhook_rule(url: &str) -> Result<(), ValidationError> {
    if url.trim().is_empty() || product::is_discord_webhook_url(url.trim()) {
        Ok(())
    } else {
        Err(rule_error("discord_webhook", "Invalid Discord webhook URL format"))
    }
}

/// Reads a price threshold given as a JSON number or numeric string
fn price_threshold(value: Option<&Value>) -> Result<Option<f64>, ApiError> {
    let invalid = || ApiError::BadRequest("Invalid price alert value".to_string());

    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn limit_reached_message(check: &LimitCheck) -> String {
    format!(
        "Product limit reached ({}/{}) for your {} plan. Upgrade to add more products.",
        check.current_count, check.max_allowed, check.plan_type
    )
}

/// Lists the caller's products
///
/// # Errors
///
/// - `400 Bad Request`: The procedure rejected the request
/// - `500 Internal Server Error`: Rows could not be loaded
pub async fn list_products(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<ProductListResponse>> {
    let user_id = caller_id(&auth)?;

    let listing = product::list_for_user(state.db(), user_id)
        .await
        .map_err(|e| ApiError::from(e).or_public("Failed to load products"))?;

    match listing {
        ProductListing::Products(products) => {
            tracing::debug!(user_id, count = products.len(), "Products listed");
            Ok(Json(ProductListResponse {
                total_count: products.len(),
                products,
            }))
        }
        ProductListing::Rejected(message) => Err(ApiError::BadRequest(message)),
    }
}

/// Starts tracking a product
///
/// # Endpoint
///
/// ```text
/// POST /api/products
/// {
///   "url": "https://www.amazon.com/dp/B0",
///   "title": "",
///   "discord_webhook_url": "https://discord.com/api/webhooks/1/abc",
///   "sms_notifications_enabled": false
/// }
/// ```
///
/// The plan limit is checked before the insert, in a separate procedure
/// call. Two concurrent adds can both pass the check.
///
/// # Errors
///
/// - `400 Bad Request`: Invalid URL or webhook, plan limit reached, or procedure rejection
/// - `500 Internal Server Error`: No answer from the database
pub async fn add_product(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<AddProductRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AddProductResponse>)> {
    let user_id = caller_id(&auth)?;
    let Json(req) = payload?;
    let req = req.normalized();

    if let Err(errors) = req.validate() {
        return Err(first_validation_error(&errors, &["url", "discord_webhook_url"]));
    }

    let public = "Failed to add product";

    match subscription::check_product_limit(state.db(), user_id)
        .await
        .map_err(|e| ApiError::from(e).or_public(public))?
    {
        LimitLookup::Checked(check) if check.can_add => {}
        LimitLookup::Checked(check) => {
            tracing::info!(
                user_id,
                current = check.current_count,
                max = check.max_allowed,
                "Product limit reached"
            );
            return Err(ApiError::BadRequest(limit_reached_message(&check)));
        }
        LimitLookup::Rejected(message) => return Err(ApiError::BadRequest(message)),
        LimitLookup::Empty => {
            return Err(ApiError::internal(public, "check_product_limit returned no rows"));
        }
    }

    let title = req.title_or_default();
    let webhook = Some(req.discord_webhook_url.as_str()).filter(|url| !url.is_empty());

    let added = product::add(
        state.db(),
        user_id,
        NewProduct {
            url: &req.url,
            title: &title,
            discord_webhook_url: webhook,
            sms_notifications_enabled: req.sms_notifications_enabled,
        },
    )
    .await
    .map_err(|e| ApiError::from(e).or_public(public))?
    .ok_or_else(|| ApiError::server(public))?;

    if !added.outcome.is_success() {
        return Err(ApiError::BadRequest(added.outcome.message));
    }

    tracing::info!(user_id, product_id = ?added.product_id, url = %req.url, "Product added");

    Ok((
        StatusCode::CREATED,
        Json(AddProductResponse {
            message: added.outcome.message,
            product_id: added.product_id,
        }),
    ))
}

/// Changes alert thresholds or the notification channel of a product
pub async fn update_product(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(product_id): Path<i64>,
    payload: Result<Json<UpdateProductRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let user_id = caller_id(&auth)?;
    let Json(req) = payload?;
    let public = "Failed to update product";

    let webhook = req
        .discord_webhook_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());

    let changes = ProductUpdate {
        min_price_alert: price_threshold(req.min_price_alert.as_ref())?,
        max_price_alert: price_threshold(req.max_price_alert.as_ref())?,
        discord_webhook_url: webhook,
        sms_notifications_enabled: req.sms_notifications_enabled,
    };

    let outcome = product::update(state.db(), user_id, product_id, changes)
        .await
        .map_err(|e| ApiError::from(e).or_public(public))?
        .ok_or_else(|| ApiError::server(public))?;

    if !outcome.is_success() {
        return Err(ApiError::BadRequest(outcome.message));
    }

    Ok(Json(MessageResponse {
        message: outcome.message,
    }))
}

/// Stops tracking a product
pub async fn delete_product(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(product_id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    let user_id = caller_id(&auth)?;
    let public = "Failed to delete product";

    let outcome = product::delete(state.db(), user_id, product_id)
        .await
        .map_err(|e| ApiError::from(e).or_public(public))?
        .ok_or_else(|| ApiError::server(public))?;

    if !outcome.is_success() {
        return Err(ApiError::BadRequest(outcome.message));
    }

    tracing::info!(user_id, product_id, "Product deleted");

    Ok(Json(MessageResponse {
        message: outcome.message,
    }))
}
