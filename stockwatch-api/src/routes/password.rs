/// Password-reset endpoints
///
/// # Flow
///
/// ```text
/// forgot-password ──> token stored (24h, single use) ──> link "sent"
///                                   │
///        verify-token <─────────────┤
///                                   ▼
///                           reset-password ──> token consumed
/// ```
///
/// `forgot-password` answers identically whether or not the account exists
/// or is active, so it cannot be used to probe for accounts.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{first_validation_error, password_rule},
};
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use stockwatch_shared::{
    auth::{
        password::{self, EMAIL_REGEX},
        reset_token,
    },
    models::user::{self, ResetTokenCheck, ResetTokenOwner},
};
use validator::Validate;

const GENERIC_ACK: &str =
    "If an account with that email exists, we have sent a password reset link.";

const INVALID_TOKEN: &str = "Invalid or expired reset token";

/// Forgot-password request
#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    #[validate(regex(path = *EMAIL_REGEX, message = "Valid email address is required"))]
    pub email: String,
}

/// Token check request
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyResetTokenRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,
}

/// Password reset request
#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,

    #[serde(default)]
    #[validate(custom(function = "password_rule"))]
    pub password: String,
}

/// Forgot-password response
#[derive(Debug, Serialize)]
pub struct ForgotPasswordResponse {
    pub message: String,
    pub email: String,
}

/// Token check response
#[derive(Debug, Serialize)]
pub struct VerifyResetTokenResponse {
    pub message: String,
    pub user: ResetTokenOwner,
}

/// `{"message": ..}` body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Starts a password reset
///
/// # Endpoint
///
/// ```text
/// POST /api/password/forgot-password
/// { "email": "ada@example.com" }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Malformed e-mail
/// - `500 Internal Server Error`: The token could not be stored
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> ApiResult<Json<ForgotPasswordResponse>> {
    let Json(mut req) = payload?;
    req.email = req.email.trim().to_lowercase();

    if let Err(errors) = req.validate() {
        return Err(first_validation_error(&errors, &["email"]));
    }

    issue_reset_link(&state, &req.email).await?;

    Ok(Json(ForgotPasswordResponse {
        message: GENERIC_ACK.to_string(),
        email: req.email,
    }))
}

/// Same as [`forgot_password`]; kept as a separate path for the "resend" button
pub async fn resend_reset(
    state: State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> ApiResult<Json<ForgotPasswordResponse>> {
    forgot_password(state, payload).await
}

/// Creates and delivers a token when the account exists and is active
async fn issue_reset_link(state: &AppState, email: &str) -> ApiResult<()> {
    let account = match user::find_by_email(state.db(), email).await? {
        Some(account) if account.is_active => account,
        Some(_) => {
            tracing::info!(email, "Password reset requested for inactive account");
            return Ok(());
        }
        None => {
            tracing::info!(email, "Password reset requested for unknown account");
            return Ok(());
        }
    };

    let token = reset_token::generate_reset_token();
    let expires_at = reset_token::reset_token_expiry_string();

    if !user::create_reset_token(state.db(), account.user_id, &token, &expires_at).await? {
        return Err(ApiError::server("Failed to generate reset token"));
    }

    let reset_url = format!(
        "{}?token={}",
        state.config.public_url("reset-password"),
        token
    );

    // Delivery failures are not reported to the caller
    if let Err(e) = state
        .mailer
        .send_reset(email, &account.full_name, &reset_url)
        .await
    {
        tracing::error!(email, error = %e, "Failed to send password reset link");
    }

    Ok(())
}

/// Checks a reset token without consuming it
pub async fn verify_reset_token(
    State(state): State<AppState>,
    payload: Result<Json<VerifyResetTokenRequest>, JsonRejection>,
) -> ApiResult<Json<VerifyResetTokenResponse>> {
    let Json(mut req) = payload?;
    req.token = req.token.trim().to_string();

    if let Err(errors) = req.validate() {
        return Err(first_validation_error(&errors, &["token"]));
    }

    match user::verify_reset_token(state.db(), &req.token).await? {
        ResetTokenCheck::Valid(owner) => Ok(Json(VerifyResetTokenResponse {
            message: "Token is valid".to_string(),
            user: owner,
        })),
        ResetTokenCheck::Rejected(message) => Err(ApiError::BadRequest(message)),
        ResetTokenCheck::Unknown => Err(ApiError::BadRequest(INVALID_TOKEN.to_string())),
    }
}

/// Sets a new password and consumes the token
///
/// The token is re-verified first; `reset_user_password` then updates the
/// hash and invalidates the token in one call.
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(mut req) = payload?;
    req.token = req.token.trim().to_string();

    if let Err(errors) = req.validate() {
        return Err(first_validation_error(&errors, &["token", "password"]));
    }

    let owner = match user::verify_reset_token(state.db(), &req.token).await? {
        ResetTokenCheck::Valid(owner) => owner,
        ResetTokenCheck::Rejected(_) | ResetTokenCheck::Unknown => {
            return Err(ApiError::BadRequest(INVALID_TOKEN.to_string()));
        }
    };

    let password_hash = password::hash_password(&req.password)?;

    let outcome = user::reset_password(state.db(), &req.token, owner.id, &password_hash)
        .await?
        .ok_or_else(|| ApiError::server("Failed to reset password"))?;

    if !outcome.is_success() {
        return Err(ApiError::BadRequest(outcome.message));
    }

    tracing::info!(user_id = owner.id, "Password reset completed");

    Ok(Json(MessageResponse {
        message: "Password reset successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_request_reports_token_before_password() {
        let req = ResetPasswordRequest {
            token: String::new(),
            password: "short".to_string(),
        };
        let errors = req.validate().unwrap_err();
        assert!(matches!(
            first_validation_error(&errors, &["token", "password"]),
            ApiError::BadRequest(ref m) if m == "Reset token is required"
        ));
    }

    #[test]
    fn test_reset_request_password_strength() {
        let req = ResetPasswordRequest {
            token: "abc".to_string(),
            password: "abcdefgh".to_string(),
        };
        let errors = req.validate().unwrap_err();
        assert!(matches!(
            first_validation_error(&errors, &["token", "password"]),
            ApiError::BadRequest(ref m) if m == "Password must contain at least one number"
        ));
    }

    #[test]
    fn test_forgot_request_email_shape() {
        let ok = ForgotPasswordRequest {
            email: "ada@example.com".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad = ForgotPasswordRequest {
            email: "ada at example".to_string(),
        };
        assert!(bad.validate().is_err());
    }
}
