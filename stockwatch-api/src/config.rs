/// Configuration management for the API server
///
/// This module loads configuration from environment variables and provides
/// a type-safe configuration struct. It is built once at startup and shared
/// through `AppState`.
///
/// # Environment Variables
///
/// - `STOCKWATCH_ENV`: `development` (default), `production` or `testing`
/// - `API_HOST` / `API_PORT`: bind address (default: 0.0.0.0:5000)
/// - `CORS_ORIGINS`: comma-separated origins, `*` for any (default: `*`)
/// - `DATABASE_URL`, or `DB_HOST` / `DB_PORT` / `DB_NAME` / `DB_USERNAME` / `DB_PASSWORD`
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `JWT_SECRET_KEY`: token signing secret (required in production)
/// - `JWT_ACCESS_TOKEN_EXPIRES_SECONDS` / `JWT_REFRESH_TOKEN_EXPIRES_SECONDS`
/// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`, `STRIPE_API_BASE`
/// - `SERVER_PREMIUM_SUCCESS_URL` / `SERVER_PREMIUM_CANCEL_URL`
/// - `BASE_URL`: public origin for reset links and checkout return URLs
///
/// # Example
///
/// ```no_run
/// use stockwatch_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use chrono::Duration;
use std::env;
use std::fmt;
use std::str::FromStr;
use stockwatch_shared::db::pool::DatabaseConfig as PoolConfig;
use stockwatch_shared::payments::stripe::DEFAULT_API_BASE;

const DEV_JWT_SECRET: &str = "jwt-secret-key-change-in-production";

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Testing,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Testing => "testing",
        }
    }

    /// Access-token lifetime when not overridden
    pub fn default_access_ttl(&self) -> Duration {
        match self {
            Environment::Development => Duration::hours(24),
            Environment::Production => Duration::days(30),
            Environment::Testing => Duration::minutes(15),
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "testing" | "test" => Ok(Environment::Testing),
            other => anyhow::bail!("Unknown STOCKWATCH_ENV value: {}", other),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,

    /// API server configuration
    pub api: ApiConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT configuration
    pub jwt: JwtConfig,

    /// Payment provider configuration
    pub payments: PaymentsConfig,

    /// Public origin without a trailing slash
    pub base_url: String,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// MySQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for JWT signing
    ///
    /// IMPORTANT: This must be kept secret. Generate with: `openssl rand -hex 32`
    pub secret: String,

    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Payment provider configuration
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Secret API key; empty disables payment routes
    pub secret_key: String,

    /// Webhook signing secret
    pub webhook_secret: String,

    pub api_base: String,

    /// Return URLs for the server premium checkout
    pub server_success_url: String,
    pub server_cancel_url: String,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// A `.env` file is read first when present.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A variable has an invalid value
    /// - Production is missing database credentials or `JWT_SECRET_KEY`
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let environment = var("STOCKWATCH_ENV")
            .map(|value| value.parse::<Environment>())
            .transpose()?
            .unwrap_or(Environment::Development);
        let production = environment == Environment::Production;

        let api_host = var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let api_port = parse_or(var("API_PORT"), 5000u16, "API_PORT")?;
        let cors_origins = var("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let database_url = match var("DATABASE_URL") {
            Some(url) => url,
            None => {
                if production
                    && (var("DB_HOST").is_none()
                        || var("DB_USERNAME").is_none()
                        || var("DB_PASSWORD").is_none())
                {
                    anyhow::bail!(
                        "DATABASE_URL or DB_HOST, DB_USERNAME and DB_PASSWORD are required in production"
                    );
                }

                let default_name = match environment {
                    Environment::Testing => "stockwatch_test",
                    _ => "stockwatch",
                };

                PoolConfig::mysql_url(
                    &var("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
                    parse_or(var("DB_PORT"), 3306u16, "DB_PORT")?,
                    &var("DB_USERNAME").unwrap_or_else(|| "root".to_string()),
                    &var("DB_PASSWORD").unwrap_or_default(),
                    &var("DB_NAME").unwrap_or_else(|| default_name.to_string()),
                )?
            }
        };
        let max_connections = parse_or(var("DATABASE_MAX_CONNECTIONS"), 10u32, "DATABASE_MAX_CONNECTIONS")?;

        let jwt_secret = match var("JWT_SECRET_KEY") {
            Some(secret) => secret,
            None if production => anyhow::bail!("JWT_SECRET_KEY is required in production"),
            None => DEV_JWT_SECRET.to_string(),
        };
        let access_ttl = match var("JWT_ACCESS_TOKEN_EXPIRES_SECONDS") {
            Some(value) => Duration::seconds(parse_or(Some(value), 0i64, "JWT_ACCESS_TOKEN_EXPIRES_SECONDS")?),
            None => environment.default_access_ttl(),
        };
        let refresh_ttl = match var("JWT_REFRESH_TOKEN_EXPIRES_SECONDS") {
            Some(value) => Duration::seconds(parse_or(Some(value), 0i64, "JWT_REFRESH_TOKEN_EXPIRES_SECONDS")?),
            None => Duration::days(90),
        };
        if access_ttl <= Duration::zero() || refresh_ttl <= Duration::zero() {
            anyhow::bail!("Token lifetimes must be positive");
        }

        let base_url = var("BASE_URL")
            .unwrap_or_else(|| "http://localhost:5000".to_string())
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).map_err(|e| anyhow::anyhow!("BASE_URL is not a valid URL: {}", e))?;

        let payments = PaymentsConfig {
            secret_key: var("STRIPE_SECRET_KEY").unwrap_or_default(),
            webhook_secret: var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            api_base: var("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            server_success_url: var("SERVER_PREMIUM_SUCCESS_URL")
                .unwrap_or_else(|| format!("{}/premium-new", base_url)),
            server_cancel_url: var("SERVER_PREMIUM_CANCEL_URL")
                .unwrap_or_else(|| format!("{}/", base_url)),
        };

        if production && payments.secret_key.is_empty() {
            tracing::warn!("STRIPE_SECRET_KEY is not set; payment routes will fail");
        }

        Ok(Self {
            environment,
            api: ApiConfig {
                host: api_host,
                port: api_port,
                cors_origins,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                access_ttl,
                refresh_ttl,
            },
            payments,
            base_url,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Whether any origin may call the API
    pub fn allows_any_origin(&self) -> bool {
        self.api.cors_origins.iter().any(|origin| origin == "*")
    }

    /// Absolute URL for a path on the public origin
    pub fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn parse_or<T>(value: Option<String>, default: T, name: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_development_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert!(config.allows_any_origin());
        assert_eq!(config.database.url, "mysql://root@localhost:3306/stockwatch");
        assert_eq!(config.jwt.access_ttl, Duration::hours(24));
        assert_eq!(config.jwt.refresh_ttl, Duration::days(90));
        assert_eq!(config.payments.server_success_url, "http://localhost:5000/premium-new");
    }

    #[test]
    fn test_testing_environment() {
        let config = load(&[("STOCKWATCH_ENV", "testing")]).unwrap();
        assert_eq!(config.jwt.access_ttl, Duration::minutes(15));
        assert!(config.database.url.ends_with("/stockwatch_test"));
    }

    #[test]
    fn test_production_requires_secrets() {
        let err = load(&[("STOCKWATCH_ENV", "production"), ("DATABASE_URL", "mysql://u:p@db/sw")])
            .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET_KEY"));

        let err = load(&[("STOCKWATCH_ENV", "production"), ("JWT_SECRET_KEY", "s3cret")]).unwrap_err();
        assert!(err.to_string().contains("DB_HOST"));
    }

    #[test]
    fn test_production_with_credentials() {
        let config = load(&[
            ("STOCKWATCH_ENV", "production"),
            ("JWT_SECRET_KEY", "s3cret"),
            ("DB_HOST", "db.internal"),
            ("DB_USERNAME", "app"),
            ("DB_PASSWORD", "pw"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
        ])
        .unwrap();

        assert!(config.is_production());
        assert_eq!(config.jwt.access_ttl, Duration::days(30));
        assert_eq!(config.database.url, "mysql://app:pw@db.internal:3306/stockwatch");
        assert!(!config.allows_any_origin());
        assert_eq!(config.api.cors_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("API_PORT", "eighty")]).is_err());
        assert!(load(&[("STOCKWATCH_ENV", "staging")]).is_err());
        assert!(load(&[("JWT_ACCESS_TOKEN_EXPIRES_SECONDS", "0")]).is_err());
    }

    #[test]
    fn test_public_url_joins_paths() {
        let config = load(&[("BASE_URL", "https://stockwatch.example/")]).unwrap();
        assert_eq!(config.public_url("/reset-password"), "https://stockwatch.example/reset-password");
        assert_eq!(config.public_url("donations"), "https://stockwatch.example/donations");
    }
}
