/// Password hashing and credential rules
///
/// New hashes use Argon2id (64 MB, 3 passes, 4 lanes, 32-byte output) in PHC
/// string format. Accounts created by the earlier service hold werkzeug
/// hashes, which still verify:
///
/// ```text
/// pbkdf2:sha256:600000$<salt>$<hex digest>
/// scrypt:32768:8:1$<salt>$<hex digest>
/// ```
///
/// [`needs_rehash`] tells the login flow to replace such a hash with Argon2id
/// once the password is known to be correct.
///
/// # Example
///
/// ```
/// use stockwatch_shared::auth::password::{hash_password, password_matches};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("tracker42")?;
/// assert!(password_matches("tracker42", &hash));
/// assert!(!password_matches("tracker43", &hash));
/// assert!(!password_matches("tracker42", "pbkdf2:sha256:600000$legacy$0badc0de"));
/// # Ok(())
/// # }
/// ```

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};
use once_cell::sync::Lazy;
use pbkdf2::pbkdf2_hmac;
use regex::Regex;
use sha2::{Sha256, Sha512};

/// Minimum password length, in characters
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// werkzeug's PBKDF2 iteration count when the hash does not name one
pub const WERKZEUG_PBKDF2_DEFAULT_ITERATIONS: u32 = 600_000;

/// Minimum full name length after trimming, in characters
pub const MIN_FULL_NAME_LENGTH: usize = 2;

/// Loose e-mail shape check: something, an `@`, something, a dot, something.
pub static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

/// Error type for password hashing operations
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Failed to hash password
    #[error("Failed to hash password: {0}")]
    HashError(String),

    /// Failed to verify password
    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    /// Stored hash is in no format this module understands
    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),
}

/// Hashes a password using Argon2id
///
/// Returns the PHC string, e.g. `$argon2id$v=19$m=65536,t=3,p=4$<salt>$<hash>`.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let params = ParamsBuilder::new()
        .m_cost(65536)
        .t_cost(3)
        .p_cost(4)
        .output_len(32)
        .build()
        .map_err(|e| PasswordError::HashError(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashError(format!("Hash generation failed: {}", e)))?;

    Ok(password_hash.to_string())
}

/// Verifies a password against a stored hash
///
/// Accepts Argon2 PHC strings and werkzeug `pbkdf2:` / `scrypt:` hashes.
/// `Ok(false)` means the password is wrong; `Err` means the hash itself is
/// unusable.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    if let Some((method, salt, digest)) = split_werkzeug(hash) {
        return verify_werkzeug(password, method, salt, digest);
    }

    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| PasswordError::InvalidHash(format!("Failed to parse hash: {}", e)))?;

    // Parameters are embedded in the hash
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyError(format!("Verification failed: {}", e))),
    }
}

/// Whether a verified hash should be replaced by a fresh Argon2id hash
pub fn needs_rehash(hash: &str) -> bool {
    !hash.starts_with("$argon2id$")
}

/// `method$salt$digest`, where method starts with `pbkdf2:` or `scrypt:`
fn split_werkzeug(hash: &str) -> Option<(&str, &str, &str)> {
    if !(hash.starts_with("pbkdf2:") || hash.starts_with("scrypt:")) {
        return None;
    }
    let mut parts = hash.splitn(3, '$');
    Some((parts.next()?, parts.next()?, parts.next()?))
}

fn verify_werkzeug(
    password: &str,
    method: &str,
    salt: &str,
    digest_hex: &str,
) -> Result<bool, PasswordError> {
    let expected = hex::decode(digest_hex)
        .map_err(|e| PasswordError::InvalidHash(format!("Digest is not hex: {}", e)))?;
    if expected.is_empty() {
        return Err(PasswordError::InvalidHash("Empty digest".to_string()));
    }

    let mut args = method.split(':');
    let scheme = args.next().unwrap_or_default();
    let args: Vec<&str> = args.collect();
    let mut derived = vec![0u8; expected.len()];

    match scheme {
        "pbkdf2" => {
            let iterations = match args.get(1) {
                Some(value) => parse_param::<u32>(value, "iterations")?,
                None => WERKZEUG_PBKDF2_DEFAULT_ITERATIONS,
            };
            match args.first().copied().unwrap_or("sha256") {
                "sha256" => pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut derived),
                "sha512" => pbkdf2_hmac::<Sha512>(password.as_bytes(), salt.as_bytes(), iterations, &mut derived),
                other => {
                    return Err(PasswordError::InvalidHash(format!(
                        "Unsupported PBKDF2 digest: {}",
                        other
                    )))
                }
            }
        }
        "scrypt" => {
            let n = args.first().map_or(Ok(1 << 15), |v| parse_param::<u64>(v, "n"))?;
            let r = args.get(1).map_or(Ok(8), |v| parse_param::<u32>(v, "r"))?;
            let p = args.get(2).map_or(Ok(1), |v| parse_param::<u32>(v, "p"))?;
            if n < 2 || !n.is_power_of_two() {
                return Err(PasswordError::InvalidHash(format!("scrypt n must be a power of two, got {}", n)));
            }

            let params = scrypt::Params::new(n.trailing_zeros() as u8, r, p, expected.len())
                .map_err(|e| PasswordError::InvalidHash(format!("Invalid scrypt parameters: {}", e)))?;
            scrypt::scrypt(password.as_bytes(), salt.as_bytes(), &params, &mut derived)
                .map_err(|e| PasswordError::VerifyError(format!("scrypt failed: {}", e)))?;
        }
        other => {
            return Err(PasswordError::InvalidHash(format!("Unknown hash method: {}", other)));
        }
    }

    Ok(constant_time_eq(&derived, &expected))
}

fn parse_param<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, PasswordError> {
    value
        .parse()
        .map_err(|_| PasswordError::InvalidHash(format!("Invalid {}: {}", name, value)))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Login-facing check: any failure, including an unreadable hash, is a mismatch
pub fn password_matches(password: &str, stored_hash: &str) -> bool {
    match verify_password(password, stored_hash) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash could not be verified");
            false
        }
    }
}

/// Validates password strength
///
/// A password must be at least 8 characters long and contain at least one
/// ASCII letter and one ASCII digit. The first failing rule is reported, worded
/// for display to the user.
///
/// # Example
///
/// ```
/// use stockwatch_shared::auth::password::validate_password_strength;
///
/// assert!(validate_password_strength("tracker42").is_ok());
/// assert_eq!(
///     validate_password_strength("short1").unwrap_err(),
///     "Password must be at least 8 characters long"
/// );
/// assert_eq!(
///     validate_password_strength("12345678").unwrap_err(),
///     "Password must contain at least one letter"
/// );
/// ```
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err("Password must be at least 8 characters long".to_string());
    }

    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err("Password must contain at least one letter".to_string());
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one number".to_string());
    }

    Ok(())
}

/// Whether `email` has the minimal `local@domain.tld` shape
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}
