/// Authentication utilities
///
/// # Modules
///
/// - [`jwt`]: access/refresh token issuing and validation
/// - [`password`]: Argon2id hashing plus password and e-mail rules
/// - [`reset_token`]: password-reset token generation
/// - [`middleware`]: bearer-token middleware and the `AuthContext` extractor
///
/// # Example
///
/// ```
/// use chrono::Duration;
/// use stockwatch_shared::auth::jwt::{ProfileClaims, TokenIssuer};
/// use stockwatch_shared::auth::password::{hash_password, password_matches};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("tracker42")?;
/// assert!(password_matches("tracker42", &hash));
///
/// let issuer = TokenIssuer::new("secret", Duration::hours(24), Duration::days(90));
/// let refresh = issuer.issue_refresh("42")?;
/// assert_eq!(issuer.validate_refresh(&refresh)?.sub, "42");
/// # Ok(())
/// # }
/// ```

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod reset_token;
