/// JWT token generation and validation module
///
/// Access and refresh tokens are signed with HS256 and carry the user id as a
/// string subject. Access tokens additionally carry the profile claims the
/// dashboard reads without a database round-trip (`email`, `full_name`,
/// `email_verified`). Tokens are stateless: logging out does not revoke them.
///
/// # Token Types
///
/// - **Access Token**: authorizes API requests (24h by default)
/// - **Refresh Token**: mints new access tokens (90d by default)
///
/// Lifetimes are environment specific and come from configuration through
/// [`TokenIssuer`].
///
/// # Example
///
/// ```
/// use chrono::Duration;
/// use stockwatch_shared::auth::jwt::{ProfileClaims, TokenIssuer, TokenType};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let issuer = TokenIssuer::new("your-secret-key", Duration::hours(24), Duration::days(90));
///
/// let profile = ProfileClaims {
///     email: "ada@example.com".to_string(),
///     full_name: "Ada Lovelace".to_string(),
///     email_verified: true,
/// };
/// let token = issuer.issue_access("42", profile)?;
///
/// let claims = issuer.validate_access(&token)?;
/// assert_eq!(claims.sub, "42");
/// assert_eq!(claims.token_type, TokenType::Access);
/// assert_eq!(claims.user_id()?, 42);
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Issuer claim written into and required from every token
pub const ISSUER: &str = "stockwatch";

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to create token
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Failed to validate token
    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Invalid issuer
    #[error("Invalid issuer: expected {expected}, got {actual}")]
    InvalidIssuer { expected: String, actual: String },

    /// Token type does not match the endpoint
    #[error("Expected {expected} token")]
    WrongType { expected: TokenType },

    /// Subject is not a numeric user id
    #[error("Invalid user ID: {0}")]
    InvalidSubject(String),
}

/// Token type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Access token (short-lived)
    Access,

    /// Refresh token (long-lived)
    Refresh,
}

impl TokenType {
    /// Gets default expiration duration for token type
    pub fn default_expiration(&self) -> Duration {
        match self {
            TokenType::Access => Duration::hours(24),
            TokenType::Refresh => Duration::days(90),
        }
    }

    /// Gets token type as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile claims embedded in access tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileClaims {
    pub email: String,
    pub full_name: String,
    pub email_verified: bool,
}

/// JWT claims structure
///
/// # Standard Claims
///
/// - `sub`: Subject (user id, string typed)
/// - `iss`: Issuer (always "stockwatch")
/// - `iat` / `exp` / `nbf`: Unix timestamps
///
/// # Custom Claims
///
/// - `token_type`: Access or refresh
/// - `email`, `full_name`, `email_verified`: access tokens only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - User ID as a string
    pub sub: String,

    /// Issuer - Always "stockwatch"
    pub iss: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// Token type (custom claim)
    pub token_type: TokenType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

impl Claims {
    /// Creates claims with the default expiration for `token_type`
    pub fn new(user_id: impl Into<String>, token_type: TokenType) -> Self {
        Self::with_expiration(user_id, token_type, token_type.default_expiration())
    }

    /// Creates claims with a custom expiration
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::Duration;
    /// use stockwatch_shared::auth::jwt::{Claims, TokenType};
    ///
    /// let claims = Claims::with_expiration("7", TokenType::Access, Duration::minutes(15));
    /// assert!(!claims.is_expired());
    /// ```
    pub fn with_expiration(
        user_id: impl Into<String>,
        token_type: TokenType,
        expires_in: Duration,
    ) -> Self {
        let now = Utc::now();
        let expiration = now + expires_in;

        Self {
            sub: user_id.into(),
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            nbf: now.timestamp(),
            token_type,
            email: None,
            full_name: None,
            email_verified: None,
        }
    }

    /// Attaches profile claims
    pub fn with_profile(mut self, profile: ProfileClaims) -> Self {
        self.email = Some(profile.email);
        self.full_name = Some(profile.full_name);
        self.email_verified = Some(profile.email_verified);
        self
    }

    /// Parses the subject as the numeric user id procedures expect
    pub fn user_id(&self) -> Result<i64, JwtError> {
        self.sub
            .trim()
            .parse::<i64>()
            .map_err(|_| JwtError::InvalidSubject(self.sub.clone()))
    }

    /// Checks if token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Gets time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let now = Utc::now().timestamp();
        if self.exp > now {
            Some(Duration::seconds(self.exp - now))
        } else {
            None
        }
    }
}

/// Creates a JWT token from claims
///
/// Signs the token using HS256 (HMAC-SHA256) with the provided secret.
///
/// # Errors
///
/// Returns `JwtError::CreateError` if token creation fails
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&header, claims, &key)
        .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

/// Validates a JWT token and extracts claims
///
/// Verifies the signature, expiration, not-before time and issuer.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        jsonwebtoken::errors::ErrorKind::InvalidIssuer => JwtError::InvalidIssuer {
            expected: ISSUER.to_string(),
            actual: "unknown".to_string(),
        },
        _ => JwtError::ValidationError(format!("Token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}

/// Validates token and checks it has the expected type
pub fn validate_typed_token(
    token: &str,
    secret: &str,
    expected: TokenType,
) -> Result<Claims, JwtError> {
    let claims = validate_token(token, secret)?;

    if claims.token_type != expected {
        return Err(JwtError::WrongType { expected });
    }

    Ok(claims)
}

/// Issues and validates tokens with configured lifetimes
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    /// Creates an issuer
    pub fn new(secret: impl Into<String>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Access token lifetime
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Refresh token lifetime
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issues an access token carrying profile claims
    pub fn issue_access(
        &self,
        user_id: impl Into<String>,
        profile: ProfileClaims,
    ) -> Result<String, JwtError> {
        let claims = Claims::with_expiration(user_id, TokenType::Access, self.access_ttl)
            .with_profile(profile);
        create_token(&claims, &self.secret)
    }

    /// Issues a refresh token (subject only)
    pub fn issue_refresh(&self, user_id: impl Into<String>) -> Result<String, JwtError> {
        let claims = Claims::with_expiration(user_id, TokenType::Refresh, self.refresh_ttl);
        create_token(&claims, &self.secret)
    }

    /// Validates an access token
    pub fn validate_access(&self, token: &str) -> Result<Claims, JwtError> {
        validate_typed_token(token, &self.secret, TokenType::Access)
    }

    /// Validates a refresh token
    pub fn validate_refresh(&self, token: &str) -> Result<Claims, JwtError> {
        validate_typed_token(token, &self.secret, TokenType::Refresh)
    }
}
