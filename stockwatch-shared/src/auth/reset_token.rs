/// Password-reset tokens
///
/// A reset token is 64 random ASCII letters and digits drawn from the OS
/// RNG. Storage, expiry and single-use enforcement belong to the
/// `create_password_reset_token` / `reset_user_password` procedures;
/// this module only produces the token and the expiry value they expect.

use chrono::{Duration, NaiveDateTime, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

/// Length of a reset token
pub const RESET_TOKEN_LENGTH: usize = 64;

/// Hours a reset token stays valid
pub const RESET_TOKEN_TTL_HOURS: i64 = 24;

/// Generates a new reset token
pub fn generate_reset_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Expiry for a token created at `now`
pub fn reset_token_expiry(now: NaiveDateTime) -> NaiveDateTime {
    now + Duration::hours(RESET_TOKEN_TTL_HOURS)
}

/// Expiry for a token created now, formatted `YYYY-MM-DD HH:MM:SS`
pub fn reset_token_expiry_string() -> String {
    reset_token_expiry(Utc::now().naive_utc())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
