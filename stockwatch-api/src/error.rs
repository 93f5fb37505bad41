/// Error handling for the API server
///
/// Every handler returns `ApiResult<T>`. Errors render as
/// `{"error": "<message>"}` with the matching status code. Internal errors
/// carry a public message for the client and a detail string that is only
/// logged.
///
/// # Example
///
/// ```
/// use stockwatch_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::{json, Value};
///
/// async fn handler(id: Option<i64>) -> ApiResult<Json<Value>> {
///     let id = id.ok_or_else(|| ApiError::BadRequest("Product ID is required".into()))?;
///     Ok(Json(json!({ "id": id })))
/// }
/// ```

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use stockwatch_shared::{
    auth::{jwt::JwtError, middleware::AuthError, password::PasswordError},
    db::gateway::DbError,
    models::ModelError,
    payments::{webhook::WebhookError, PaymentError},
};

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Message used when a failure has no more specific public text
pub const GENERIC_INTERNAL: &str = "Internal server error";

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Not found (404)
    NotFound(String),

    /// Not implemented (501); rendered as `{"message": ..}`
    NotImplemented(String),

    /// Internal server error (500)
    Internal {
        /// Returned to the client
        public: String,
        /// Logged only
        detail: String,
    },
}

impl ApiError {
    /// Internal error with a route-specific public message
    pub fn internal(public: impl Into<String>, detail: impl fmt::Display) -> Self {
        ApiError::Internal {
            public: public.into(),
            detail: detail.to_string(),
        }
    }

    /// Internal error whose message is safe to return as-is
    ///
    /// Used for procedure status messages, which are written for end users.
    pub fn server(message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::Internal {
            detail: message.clone(),
            public: message,
        }
    }

    /// Gives an internal error that still carries the generic text a
    /// route-specific public message; every other error is returned as-is
    pub fn or_public(self, public: &str) -> Self {
        match self {
            ApiError::Internal {
                public: current,
                detail,
            } if current == GENERIC_INTERNAL => ApiError::Internal {
                public: public.to_string(),
                detail,
            },
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            ApiError::Internal { public, detail } => write!(f, "{}: {}", public, detail),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match self {
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) | ApiError::NotFound(msg) => {
                json!({ "error": msg })
            }
            ApiError::NotImplemented(msg) => json!({ "message": msg }),
            ApiError::Internal { public, detail } => {
                // Log internal errors but don't expose details to clients
                tracing::error!(error = %detail, "{}", public);
                json!({ "error": public })
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Missing, malformed or non-JSON bodies
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "Rejected request body");
        ApiError::BadRequest("No data provided".to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::internal(GENERIC_INTERNAL, err)
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        ApiError::internal(GENERIC_INTERNAL, err)
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::internal(GENERIC_INTERNAL, format!("Password operation failed: {}", err))
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::internal(GENERIC_INTERNAL, err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

/// Token failures surface the same way the auth middleware reports them
impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        ApiError::from(AuthError::from(err))
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        tracing::warn!(error = %err, "Rejected webhook delivery");
        if err.is_signature_error() {
            ApiError::BadRequest("Invalid signature".to_string())
        } else {
            ApiError::BadRequest("Invalid payload".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("User not found".to_string());
        assert_eq!(err.to_string(), "Not found: User not found");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = ApiError::internal("Failed to load products", "connection reset").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body, json!({ "error": "Failed to load products" }));
    }

    #[tokio::test]
    async fn test_not_implemented_uses_message_key() {
        let response = ApiError::NotImplemented("later".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body_json(response).await, json!({ "message": "later" }));
    }

    #[test]
    fn test_or_public_only_replaces_generic_text() {
        let err = ApiError::from(DbError::Other("boom".into())).or_public("Failed to update settings");
        assert!(matches!(err, ApiError::Internal { ref public, .. } if public == "Failed to update settings"));

        let err = ApiError::BadRequest("x".into()).or_public("ignored");
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "x"));

        let err = ApiError::server("Product not found").or_public("Failed to update product");
        assert!(matches!(err, ApiError::Internal { ref public, .. } if public == "Product not found"));
    }

    #[test]
    fn test_jwt_errors_map_to_unauthorized() {
        assert!(matches!(
            ApiError::from(JwtError::Expired),
            ApiError::Unauthorized(ref m) if m == "Token has expired"
        ));
    }
}
