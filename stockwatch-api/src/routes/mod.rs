/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Registration, login, token refresh/verification, logout
/// - `password`: Password-reset flow
/// - `products`: Tracked products
/// - `dashboard`: Dashboard overview
/// - `settings`: User settings
/// - `premium`: Subscriptions, plans and checkout
/// - `server_premium`: Discord server premium checkout and webhook
/// - `donations`: Donation checkout, webhook and admin listing

pub mod auth;
pub mod dashboard;
pub mod donations;
pub mod health;
pub mod password;
pub mod premium;
pub mod products;
pub mod server_premium;
pub mod settings;

use crate::error::ApiError;
use std::borrow::Cow;
use stockwatch_shared::auth::{middleware::AuthContext, password as credentials};
use validator::{ValidationError, ValidationErrors};

/// First validation message, checking fields in `order`
///
/// `validator` collects every failing field; clients expect the message of
/// the first rule that failed in form order.
pub(crate) fn first_validation_error(errors: &ValidationErrors, order: &[&str]) -> ApiError {
    let fields = errors.field_errors();

    let message = order
        .iter()
        .filter_map(|field| fields.get(*field))
        .flat_map(|errors| errors.iter())
        .find_map(|error| error.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Invalid request".to_string());

    ApiError::BadRequest(message)
}

/// `validator` rule wrapping the shared password-strength check
pub(crate) fn password_rule(password: &str) -> Result<(), ValidationError> {
    credentials::validate_password_strength(password).map_err(|message| {
        let mut error = ValidationError::new("password_strength");
        error.message = Some(Cow::Owned(message));
        error
    })
}

/// Numeric user id of the authenticated caller
pub(crate) fn caller_id(auth: &AuthContext) -> Result<i64, ApiError> {
    auth.user_id().map_err(|_| {
        tracing::warn!(subject = auth.subject(), "Token subject is not a user id");
        ApiError::Unauthorized("Invalid user ID".to_string())
    })
}

/// Unix timestamp from the request clock
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
