/// Bearer-token authentication for Axum
///
/// Protected route groups are wrapped with [`require_access_token`] (or
/// [`require_refresh_token`] for the refresh endpoint). On success the
/// decoded claims are stored in the request extensions as an [`AuthContext`],
/// which handlers take as an extractor.
///
/// Failures are always 401 with a JSON body:
///
/// - no `Authorization` header: `Authorization token is required`
/// - expired token: `Token has expired`
/// - anything else (bad signature, wrong type, malformed header): `Invalid token`
///
/// # Example
///
/// ```no_run
/// use axum::{middleware, routing::get, Router};
/// use chrono::Duration;
/// use stockwatch_shared::auth::jwt::TokenIssuer;
/// use stockwatch_shared::auth::middleware::{require_access_token, AuthContext};
///
/// async fn whoami(auth: AuthContext) -> String {
///     format!("user {}", auth.subject())
/// }
///
/// let issuer = TokenIssuer::new("secret", Duration::hours(24), Duration::days(90));
/// let app: Router = Router::new()
///     .route("/whoami", get(whoami))
///     .layer(middleware::from_fn_with_state(issuer, require_access_token));
/// ```

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::jwt::{Claims, JwtError, TokenIssuer, TokenType};

/// Identity attached to an authenticated request
#[derive(Debug, Clone)]
pub struct AuthContext {
    claims: Claims,
}

impl AuthContext {
    /// Wraps validated claims
    pub fn new(claims: Claims) -> Self {
        Self { claims }
    }

    /// Token subject exactly as issued
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    /// Numeric user id parsed from the subject
    pub fn user_id(&self) -> Result<i64, JwtError> {
        self.claims.user_id()
    }

    /// Full claim set
    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

/// Authentication failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header
    #[error("Authorization token is required")]
    MissingCredentials,

    /// Token past its `exp`
    #[error("Token has expired")]
    Expired,

    /// Malformed header, bad signature, wrong issuer or wrong token type
    #[error("Invalid token")]
    InvalidToken,
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::Expired,
            _ => AuthError::InvalidToken,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Only present when a token middleware ran first
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

/// Extracts the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::InvalidToken)?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::InvalidToken)?;

    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }

    Ok(token)
}

/// Validates the bearer token in `headers` as a token of `expected` type
pub fn authenticate(
    headers: &HeaderMap,
    issuer: &TokenIssuer,
    expected: TokenType,
) -> Result<AuthContext, AuthError> {
    let token = bearer_token(headers)?;

    let claims = match expected {
        TokenType::Access => issuer.validate_access(token),
        TokenType::Refresh => issuer.validate_refresh(token),
    }
    .map_err(|e| {
        tracing::debug!(error = %e, token_type = %expected, "Token rejected");
        AuthError::from(e)
    })?;

    Ok(AuthContext::new(claims))
}

/// Middleware requiring a valid access token
pub async fn require_access_token(
    State(issuer): State<TokenIssuer>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let context = authenticate(req.headers(), &issuer, TokenType::Access)?;
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

/// Middleware requiring a valid refresh token
pub async fn require_refresh_token(
    State(issuer): State<TokenIssuer>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let context = authenticate(req.headers(), &issuer, TokenType::Refresh)?;
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}
