/// User accounts and password-reset tokens
///
/// # Procedures
///
/// | Procedure | Parameters | Row |
/// |---|---|---|
/// | `create_user_account` | full name, email, hash, newsletter | `(status, message)` |
/// | `verify_user_login` | email | `(status, message, user_id, password_hash, full_name, email_verified, is_active)` |
/// | `get_user_by_id` | user id | `(status, message, email, full_name, email_verified)` |
/// | `get_user_by_email` | email | `(status, message, user_id, full_name, is_active)` |
/// | `update_user_last_login` | user id | ignored |
/// | `update_user_activity` | user id, activity type | ignored |
/// | `create_password_reset_token` | user id, token, expiry | `(status, message)` |
/// | `verify_password_reset_token` | token | `(status, message, user_id, email, full_name)` |
/// | `reset_user_password` | token, user id, hash | `(status, message)` |
///
/// A lookup whose first row does not report `success` is treated as "not
/// found"; the procedure's message is only logged.
///
/// # Example
///
/// ```no_run
/// use stockwatch_shared::db::gateway::ProcedureGateway;
/// use stockwatch_shared::models::user;
///
/// # async fn example(gateway: &dyn ProcedureGateway) -> Result<(), Box<dyn std::error::Error>> {
/// if let Some(profile) = user::find_by_id(gateway, 42).await? {
///     println!("{} <{}>", profile.full_name, profile.email);
/// }
/// # Ok(())
/// # }
/// ```

use serde::Serialize;

use super::ModelResult;
use crate::db::{
    gateway::{ProcParams, ProcedureGateway},
    row::{ProcOutcome, ProcRow},
};

/// Credentials and flags returned by `verify_user_login`
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRecord {
    pub user_id: i64,
    pub password_hash: String,
    pub full_name: String,
    pub email_verified: bool,
    pub is_active: bool,
}

impl LoginRecord {
    fn from_row(row: &ProcRow) -> Result<Self, crate::db::row::DecodeError> {
        Ok(Self {
            user_id: row.int_or(2, 0)?,
            password_hash: row.text(3)?.unwrap_or_default(),
            full_name: row.text(4)?.unwrap_or_default(),
            email_verified: row.flag(5, false)?,
            is_active: row.flag(6, false)?,
        })
    }
}

/// Profile returned by `get_user_by_id`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub email: String,
    pub full_name: String,
    pub email_verified: bool,
}

impl UserProfile {
    fn from_row(row: &ProcRow) -> Result<Self, crate::db::row::DecodeError> {
        Ok(Self {
            email: row.text(2)?.unwrap_or_default(),
            full_name: row.text(3)?.unwrap_or_default(),
            email_verified: row.flag(4, false)?,
        })
    }
}

/// Account summary returned by `get_user_by_email`
#[derive(Debug, Clone, PartialEq)]
pub struct EmailLookup {
    pub user_id: i64,
    pub full_name: String,
    pub is_active: bool,
}

impl EmailLookup {
    fn from_row(row: &ProcRow) -> Result<Self, crate::db::row::DecodeError> {
        Ok(Self {
            user_id: row.int_or(2, 0)?,
            full_name: row.text(3)?.unwrap_or_default(),
            is_active: row.flag(4, false)?,
        })
    }
}

/// Owner of a valid reset token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetTokenOwner {
    pub id: i64,
    pub email: String,
    pub name: String,
}

impl ResetTokenOwner {
    fn from_row(row: &ProcRow) -> Result<Self, crate::db::row::DecodeError> {
        Ok(Self {
            id: row.int_or(2, 0)?,
            email: row.text(3)?.unwrap_or_default(),
            name: row.text(4)?.unwrap_or_default(),
        })
    }
}

/// Outcome of `verify_password_reset_token`
#[derive(Debug, Clone, PartialEq)]
pub enum ResetTokenCheck {
    /// Token exists, is unused and not expired
    Valid(ResetTokenOwner),

    /// Procedure rejected the token with this message
    Rejected(String),

    /// Procedure returned nothing
    Unknown,
}

/// Input for `create_user_account`
#[derive(Debug, Clone)]
pub struct NewAccount<'a> {
    pub full_name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub newsletter_opt_in: bool,
}

/// Creates an account; `None` when the procedure returned no rows
pub async fn create_account(
    gateway: &dyn ProcedureGateway,
    account: NewAccount<'_>,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "create_user_account",
            ProcParams::new()
                .with("p_full_name", account.full_name)
                .with("p_email", account.email)
                .with("p_password_hash", account.password_hash)
                .with("p_newsletter_opt_in", account.newsletter_opt_in),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

/// Looks up login credentials by (lowercased) e-mail
pub async fn verify_login(
    gateway: &dyn ProcedureGateway,
    email: &str,
) -> ModelResult<Option<LoginRecord>> {
    let rows = gateway
        .call("verify_user_login", ProcParams::new().with("p_email", email))
        .await?;

    match first_success(&rows, "verify_user_login") {
        Some(row) => Ok(Some(LoginRecord::from_row(row)?)),
        None => Ok(None),
    }
}

/// Fetches a user's profile
pub async fn find_by_id(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
) -> ModelResult<Option<UserProfile>> {
    let rows = gateway
        .call("get_user_by_id", ProcParams::new().with("p_user_id", user_id))
        .await?;

    match first_success(&rows, "get_user_by_id") {
        Some(row) => Ok(Some(UserProfile::from_row(row)?)),
        None => Ok(None),
    }
}

/// Looks up an account by e-mail for the reset flow
pub async fn find_by_email(
    gateway: &dyn ProcedureGateway,
    email: &str,
) -> ModelResult<Option<EmailLookup>> {
    let rows = gateway
        .call("get_user_by_email", ProcParams::new().with("p_email", email))
        .await?;

    match first_success(&rows, "get_user_by_email") {
        Some(row) => Ok(Some(EmailLookup::from_row(row)?)),
        None => Ok(None),
    }
}

/// Stamps the last-login time
pub async fn update_last_login(gateway: &dyn ProcedureGateway, user_id: i64) -> ModelResult<()> {
    gateway
        .call(
            "update_user_last_login",
            ProcParams::new().with("p_user_id", user_id),
        )
        .await?;
    Ok(())
}

/// Replaces a user's password hash outside the reset flow
///
/// Used to upgrade werkzeug hashes to Argon2id after a successful login.
pub async fn update_password_hash(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    password_hash: &str,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "update_user_password_hash",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_password_hash", password_hash),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

/// Records an activity entry such as `logout`
pub async fn record_activity(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    activity_type: &str,
) -> ModelResult<()> {
    gateway
        .call(
            "update_user_activity",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_activity_type", activity_type),
        )
        .await?;
    Ok(())
}

/// Stores a reset token; returns whether the procedure reported success
pub async fn create_reset_token(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    token: &str,
    expires_at: &str,
) -> ModelResult<bool> {
    let rows = gateway
        .call(
            "create_password_reset_token",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_token", token)
                .with("p_expires_at", expires_at),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows).is_some_and(|o| o.is_success()))
}

/// Checks a reset token
pub async fn verify_reset_token(
    gateway: &dyn ProcedureGateway,
    token: &str,
) -> ModelResult<ResetTokenCheck> {
    let rows = gateway
        .call(
            "verify_password_reset_token",
            ProcParams::new().with("p_token", token),
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(ResetTokenCheck::Unknown);
    };

    if !row.is_success() {
        return Ok(ResetTokenCheck::Rejected(
            row.text(1).ok().flatten().unwrap_or_default(),
        ));
    }

    Ok(ResetTokenCheck::Valid(ResetTokenOwner::from_row(row)?))
}

/// Replaces the password hash and consumes the token in one procedure call
pub async fn reset_password(
    gateway: &dyn ProcedureGateway,
    token: &str,
    user_id: i64,
    password_hash: &str,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "reset_user_password",
            ProcParams::new()
                .with("p_token", token)
                .with("p_user_id", user_id)
                .with("p_new_password_hash", password_hash),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

fn first_success<'a>(rows: &'a [ProcRow], procedure: &str) -> Option<&'a ProcRow> {
    let row = rows.first()?;
    if row.is_success() {
        return Some(row);
    }
    tracing::debug!(
        procedure,
        status = row.status().unwrap_or_default(),
        message = row.text(1).ok().flatten().unwrap_or_default(),
        "Lookup did not succeed"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::row::Scalar;

    #[test]
    fn test_login_record_decoding() {
        let row = ProcRow::new(vec![
            Scalar::from("success"),
            Scalar::from("User found"),
            Scalar::Int(42),
            Scalar::from("$argon2id$v=19$..."),
            Scalar::from("Ada Lovelace"),
            Scalar::Int(1),
            Scalar::Null,
        ]);

        let record = LoginRecord::from_row(&row).unwrap();
        assert_eq!(record.user_id, 42);
        assert_eq!(record.full_name, "Ada Lovelace");
        assert!(record.email_verified);
        assert!(!record.is_active);
    }

    #[test]
    fn test_profile_decoding_short_row_fails() {
        let row = ProcRow::new(vec![Scalar::from("success"), Scalar::from("User found")]);
        assert!(UserProfile::from_row(&row).is_err());
    }

    #[test]
    fn test_first_success_skips_error_status() {
        let rows = vec![ProcRow::new(vec![
            Scalar::from("error"),
            Scalar::from("User not found"),
        ])];
        assert!(first_success(&rows, "get_user_by_id").is_none());
        assert!(first_success(&[], "get_user_by_id").is_none());
    }
}
