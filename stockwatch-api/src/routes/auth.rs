/// Authentication endpoints
///
/// This module provides user authentication endpoints:
/// - Registration
/// - Login
/// - Token refresh
/// - Token verification
/// - Logout
///
/// # Endpoints
///
/// - `POST /api/auth/register` - Register new user
/// - `POST /api/auth/login` - Login and get tokens
/// - `POST /api/auth/refresh` - New access token from a refresh token
/// - `GET /api/auth/verify-token` - Current user for an access token
/// - `POST /api/auth/logout` - Record the logout (tokens stay valid until expiry)
///
/// Tokens are stateless. Logout only writes an activity entry; the client is
/// expected to drop its tokens.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{caller_id, first_validation_error, password_rule},
};
use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use stockwatch_shared::{
    auth::{
        jwt::ProfileClaims,
        middleware::AuthContext,
        password::{self, EMAIL_REGEX},
    },
    models::user::{self, NewAccount},
};
use validator::Validate;

/// Uniform login failure; never says which credential was wrong
const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Display name, at least two characters after trimming
    #[serde(default, rename = "fullName", alias = "full_name")]
    #[validate(length(min = 2, message = "Full name is required and must be at least 2 characters"))]
    pub full_name: String,

    /// Email address
    #[serde(default)]
    #[validate(regex(path = *EMAIL_REGEX, message = "Valid email address is required"))]
    pub email: String,

    /// Password (validated for strength)
    #[serde(default)]
    #[validate(custom(function = "password_rule"))]
    pub password: String,

    /// Newsletter opt-in
    #[serde(default)]
    pub newsletter: bool,
}

impl RegisterRequest {
    /// Trims the name and trims/lowercases the e-mail
    fn normalized(mut self) -> Self {
        self.full_name = self.full_name.trim().to_string();
        self.email = self.email.trim().to_lowercase();
        self
    }
}

/// Public part of a new account
#[derive(Debug, Serialize)]
pub struct RegisteredUser {
    pub email: String,
    pub full_name: String,
}

/// Register response
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: RegisteredUser,
}

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub password: String,
}

/// User block of the login response
#[derive(Debug, Serialize)]
pub struct LoginUser {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub email_verified: bool,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user: LoginUser,
}

/// Refresh token response
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// New access token
    pub access_token: String,
}

/// User block of the verify-token response
#[derive(Debug, Serialize)]
pub struct VerifiedUser {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub email_verified: bool,

    /// Alias of `full_name` kept for older clients
    pub name: String,
}

/// Verify-token response
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user: VerifiedUser,
}

/// Simple `{"message": ..}` body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Register a new user
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/register
/// Content-Type: application/json
///
/// {
///   "fullName": "Ada Lovelace",
///   "email": "ada@example.com",
///   "password": "engine1843",
///   "newsletter": false
/// }
/// ```
///
/// # Response (201)
///
/// ```json
/// {
///   "message": "Account created successfully",
///   "user": { "email": "ada@example.com", "full_name": "Ada Lovelace" }
/// }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Validation failed, or the procedure rejected the account
/// - `500 Internal Server Error`: Server error
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let Json(req) = payload?;
    let req = req.normalized();

    if let Err(errors) = req.validate() {
        let error = first_validation_error(&errors, &["full_name", "email", "password"]);
        tracing::info!(email = %req.email, error = %error, "Registration rejected");
        return Err(error);
    }

    create_account(&state, &req)
        .await
        .map_err(|e| e.or_public("Internal server error during registration"))?;

    tracing::info!(
        email = %req.email,
        newsletter = req.newsletter,
        "New user registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Account created successfully".to_string(),
            user: RegisteredUser {
                email: req.email,
                full_name: req.full_name,
            },
        }),
    ))
}

async fn create_account(state: &AppState, req: &RegisterRequest) -> ApiResult<()> {
    let password_hash = password::hash_password(&req.password)?;

    let outcome = user::create_account(
        state.db(),
        NewAccount {
            full_name: &req.full_name,
            email: &req.email,
            password_hash: &password_hash,
            newsletter_opt_in: req.newsletter,
        },
    )
    .await?
    .ok_or_else(|| ApiError::server("Registration failed - no response from database"))?;

    if !outcome.is_success() {
        tracing::info!(email = %req.email, message = %outcome.message, "Account creation refused");
        return Err(ApiError::BadRequest(outcome.message));
    }

    Ok(())
}

/// Login and get tokens
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/login
/// Content-Type: application/json
///
/// { "email": "ada@example.com", "password": "engine1843" }
/// ```
///
/// # Response
///
/// ```json
/// {
///   "message": "Login successful",
///   "access_token": "eyJ...",
///   "refresh_token": "eyJ...",
///   "user": { "id": 42, "email": "ada@example.com", "full_name": "Ada Lovelace", "email_verified": true }
/// }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Email or password missing
/// - `401 Unauthorized`: Unknown e-mail or wrong password (same body for both), or inactive account
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(req) = payload?;
    let email = req.email.trim().to_lowercase();

    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".to_string()));
    }

    authenticate(&state, email, &req.password)
        .await
        .map_err(|e| e.or_public("Internal server error during login"))
        .map(Json)
}

/// Stores an Argon2id hash in place of a verified werkzeug hash
///
/// Best effort: the login succeeds either way and the upgrade is retried on
/// the next login.
async fn upgrade_password_hash(state: &AppState, user_id: i64, password: &str) {
    let hash = match password::hash_password(password) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!(user_id, error = %e, "Could not hash password for upgrade");
            return;
        }
    };

    match user::update_password_hash(state.db(), user_id, &hash).await {
        Ok(Some(outcome)) if outcome.is_success() => {
            tracing::info!(user_id, "Legacy password hash upgraded to Argon2id");
        }
        Ok(outcome) => {
            let message = outcome.map(|o| o.message).unwrap_or_default();
            tracing::warn!(user_id, message = %message, "Password hash upgrade was not applied");
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Password hash upgrade failed");
        }
    }
}

async fn authenticate(state: &AppState, email: String, password: &str) -> ApiResult<LoginResponse> {
    let Some(record) = user::verify_login(state.db(), &email).await? else {
        tracing::info!(email = %email, "Login failed: unknown account");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    };

    if !password::password_matches(password, &record.password_hash) {
        tracing::info!(email = %email, "Login failed: wrong password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    if !record.is_active {
        tracing::info!(email = %email, "Login failed: inactive account");
        return Err(ApiError::Unauthorized(
            "Account is deactivated. Please contact support.".to_string(),
        ));
    }

    if password::needs_rehash(&record.password_hash) {
        upgrade_password_hash(state, record.user_id, password).await;
    }

    let subject = record.user_id.to_string();
    let access_token = state
        .tokens
        .issue_access(
            subject.clone(),
            ProfileClaims {
                email: email.clone(),
                full_name: record.full_name.clone(),
                email_verified: record.email_verified,
            },
        )
        .map_err(|e| ApiError::internal(crate::error::GENERIC_INTERNAL, e))?;
    let refresh_token = state
        .tokens
        .issue_refresh(subject)
        .map_err(|e| ApiError::internal(crate::error::GENERIC_INTERNAL, e))?;

    user::update_last_login(state.db(), record.user_id).await?;

    tracing::info!(user_id = record.user_id, email = %email, "User logged in");

    Ok(LoginResponse {
        message: "Login successful".to_string(),
        access_token,
        refresh_token,
        user: LoginUser {
            id: record.user_id,
            email,
            full_name: record.full_name,
            email_verified: record.email_verified,
        },
    })
}

/// Issues a new access token
///
/// Requires a refresh token. Profile claims are re-read so name or
/// verification changes show up in the new token.
///
/// # Errors
///
/// - `401 Unauthorized`: Missing/invalid refresh token, non-numeric subject, or unknown user
pub async fn refresh(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<RefreshResponse>> {
    let user_id = caller_id(&auth)?;

    let profile = user::find_by_id(state.db(), user_id)
        .await
        .map_err(|e| ApiError::from(e).or_public("Token refresh failed"))?
        .ok_or_else(|| {
            tracing::info!(user_id, "Token refresh for unknown user");
            ApiError::Unauthorized("User not found".to_string())
        })?;

    let access_token = state
        .tokens
        .issue_access(
            auth.subject(),
            ProfileClaims {
                email: profile.email,
                full_name: profile.full_name,
                email_verified: profile.email_verified,
            },
        )
        .map_err(|e| ApiError::internal("Token refresh failed", e))?;

    tracing::debug!(user_id, "Access token refreshed");
    Ok(Json(RefreshResponse { access_token }))
}

/// Returns the user behind an access token
///
/// # Errors
///
/// - `401 Unauthorized`: Missing/invalid token or non-numeric subject
/// - `404 Not Found`: The user no longer exists
pub async fn verify_token(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<VerifyResponse>> {
    let user_id = caller_id(&auth)?;

    let profile = user::find_by_id(state.db(), user_id)
        .await
        .map_err(|e| ApiError::from(e).or_public("Token verification failed"))?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(VerifyResponse {
        valid: true,
        user: VerifiedUser {
            id: user_id,
            email: profile.email,
            name: profile.full_name.clone(),
            full_name: profile.full_name,
            email_verified: profile.email_verified,
        },
    }))
}

/// Records a logout
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<MessageResponse>> {
    let user_id = caller_id(&auth)?;

    let result: ApiResult<()> = async {
        let profile = user::find_by_id(state.db(), user_id).await?;
        user::record_activity(state.db(), user_id, "logout").await?;

        let email = profile.as_ref().map(|p| p.email.as_str()).unwrap_or("Unknown");
        tracing::info!(user_id, email, "User logged out");
        Ok(())
    }
    .await;
    result.map_err(|e| e.or_public("Logout failed"))?;

    Ok(Json(MessageResponse {
        message: "Logout successful".to_string(),
    }))
}
