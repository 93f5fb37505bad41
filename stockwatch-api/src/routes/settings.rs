/// User settings endpoints
///
/// ```text
/// GET /api/settings   settings object, or {} when none are stored
/// PUT /api/settings   partial update; absent fields are sent as NULL
/// ```

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::caller_id,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use stockwatch_shared::{
    auth::middleware::AuthContext,
    models::{
        product::is_discord_webhook_url,
        settings::{self, SettingsLookup, SettingsUpdate},
    },
};

/// `{"message": ..}` body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Returns the caller's settings
///
/// # Errors
///
/// - `400 Bad Request`: The procedure rejected the request
/// - `500 Internal Server Error`: No answer from the database
pub async fn get_settings(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Value>> {
    let user_id = caller_id(&auth)?;
    let public = "Failed to load settings";

    let lookup = settings::get(state.db(), user_id)
        .await
        .map_err(|e| ApiError::from(e).or_public(public))?;

    match lookup {
        SettingsLookup::Found(Some(found)) => serde_json::to_value(found)
            .map(Json)
            .map_err(|e| ApiError::internal(public, e)),
        SettingsLookup::Found(None) => Ok(Json(json!({}))),
        SettingsLookup::Rejected(message) => Err(ApiError::BadRequest(message)),
        SettingsLookup::Empty => Err(ApiError::server(public)),
    }
}

/// Stores a settings update
///
/// # Errors
///
/// - `400 Bad Request`: Missing body, non-Discord webhook URL, or procedure rejection
/// - `500 Internal Server Error`: No answer from the database
pub async fn update_settings(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<SettingsUpdate>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let user_id = caller_id(&auth)?;
    let Json(changes) = payload?;
    let public = "Failed to update settings";

    if let Some(webhook) = changes.webhook() {
        if !is_discord_webhook_url(webhook) {
            return Err(ApiError::BadRequest(
                "Invalid Discord webhook URL format".to_string(),
            ));
        }
    }

    let outcome = settings::update(state.db(), user_id, &changes)
        .await
        .map_err(|e| ApiError::from(e).or_public(public))?
        .ok_or_else(|| ApiError::server(public))?;

    if !outcome.is_success() {
        return Err(ApiError::BadRequest(outcome.message));
    }

    tracing::info!(user_id, "Settings updated");

    Ok(Json(MessageResponse {
        message: outcome.message,
    }))
}
