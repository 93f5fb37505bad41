/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use stockwatch_api::{app::{build_router, AppState}, config::Config};
/// use stockwatch_shared::{
///     db::{gateway::MySqlGateway, pool::{create_pool, DatabaseConfig}},
///     notify::LogMailer,
///     payments::StripeClient,
/// };
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = create_pool(DatabaseConfig {
///     url: config.database.url.clone(),
///     ..Default::default()
/// })
/// .await?;
/// let stripe = StripeClient::new(&config.payments.secret_key, &config.payments.api_base)?;
///
/// let state = AppState::new(
///     Arc::new(MySqlGateway::new(pool)),
///     Arc::new(stripe),
///     Arc::new(LogMailer),
///     config,
/// );
/// let app = build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, middleware::security::SecurityHeadersLayer};
use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use stockwatch_shared::{
    auth::{
        jwt::TokenIssuer,
        middleware::{require_access_token, require_refresh_token},
    },
    db::gateway::ProcedureGateway,
    notify::PasswordResetMailer,
    payments::PaymentProvider,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Every collaborator sits behind an `Arc`, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Stored-procedure gateway
    pub gateway: Arc<dyn ProcedureGateway>,

    /// Payment provider
    pub payments: Arc<dyn PaymentProvider>,

    /// Password-reset notifications
    pub mailer: Arc<dyn PasswordResetMailer>,

    /// Token issuer built from the JWT configuration
    pub tokens: TokenIssuer,

    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates new application state
    pub fn new(
        gateway: Arc<dyn ProcedureGateway>,
        payments: Arc<dyn PaymentProvider>,
        mailer: Arc<dyn PasswordResetMailer>,
        config: Config,
    ) -> Self {
        let tokens = TokenIssuer::new(
            config.jwt.secret.clone(),
            config.jwt.access_ttl,
            config.jwt.refresh_ttl,
        );

        Self {
            gateway,
            payments,
            mailer,
            tokens,
            config: Arc::new(config),
        }
    }

    /// Gateway as a trait object reference, the form model functions take
    pub fn db(&self) -> &dyn ProcedureGateway {
        self.gateway.as_ref()
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                         # Health check (public)
/// └── /api/
///     ├── /auth/                      # register, login (public); refresh (refresh token);
///     │                               # verify-token, logout (access token)
///     ├── /password/                  # reset flow (public)
///     ├── /products                   # GET, POST; /:id PUT, DELETE (access token)
///     ├── /dashboard/overview         # (access token)
///     ├── /settings                   # GET, PUT (access token)
///     ├── /premium/                   # plans, webhook (public); everything else (access token)
///     ├── /stripe/                    # server premium checkout + webhook (public)
///     └── /donation/                  # checkout, success, webhook (public);
///                                     # admin/donations (access token)
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Logging (tower-http TraceLayer)
/// 2. CORS (tower-http CorsLayer), which also answers preflight requests
/// 3. Security headers (production only)
/// 4. Authentication (per route group, via `route_layer`)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let access = from_fn_with_state(state.tokens.clone(), require_access_token);
    let refresh = from_fn_with_state(state.tokens.clone(), require_refresh_token);

    // Health check (public, no auth)
    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .merge(
            Router::new()
                .route("/refresh", post(routes::auth::refresh))
                .route_layer(refresh),
        )
        .merge(
            Router::new()
                .route("/verify-token", get(routes::auth::verify_token))
                .route("/logout", post(routes::auth::logout))
                .route_layer(access.clone()),
        );

    let password_routes = Router::new()
        .route("/forgot-password", post(routes::password::forgot_password))
        .route("/verify-token", post(routes::password::verify_reset_token))
        .route("/reset-password", post(routes::password::reset_password))
        .route("/resend-reset", post(routes::password::resend_reset));

    let product_routes = Router::new()
        .route(
            "/",
            get(routes::products::list_products).post(routes::products::add_product),
        )
        .route(
            "/:id",
            put(routes::products::update_product).delete(routes::products::delete_product),
        )
        .route_layer(access.clone());

    let dashboard_routes = Router::new()
        .route("/overview", get(routes::dashboard::overview))
        .route_layer(access.clone());

    let settings_routes = Router::new()
        .route(
            "/",
            get(routes::settings::get_settings).put(routes::settings::update_settings),
        )
        .route_layer(access.clone());

    let premium_routes = Router::new()
        .route("/plans", get(routes::premium::plans))
        .route("/webhook", post(routes::premium::webhook))
        .merge(
            Router::new()
                .route("/subscription", get(routes::premium::subscription))
                .route("/check-limit", get(routes::premium::check_limit))
                .route(
                    "/create-checkout-session",
                    post(routes::premium::create_checkout_session),
                )
                .route("/process-success", post(routes::premium::process_success))
                .route("/cancel", post(routes::premium::cancel))
                .route("/update", put(routes::premium::update))
                .route_layer(access.clone()),
        );

    let server_premium_routes = Router::new()
        .route("/request", post(routes::server_premium::create_checkout))
        .route("/webhook", post(routes::server_premium::webhook));

    let donation_routes = Router::new()
        .route("/create-session", post(routes::donations::create_session))
        .route("/success", get(routes::donations::success))
        .route("/webhook", post(routes::donations::webhook))
        .merge(
            Router::new()
                .route("/admin/donations", get(routes::donations::list_donations))
                .route_layer(access),
        );

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/password", password_routes)
        .nest("/products", product_routes)
        .nest("/dashboard", dashboard_routes)
        .nest("/settings", settings_routes)
        .nest("/premium", premium_routes)
        .nest("/stripe", server_premium_routes)
        .nest("/donation", donation_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api", api_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(&state.config))
        .layer(SecurityHeadersLayer::new(state.config.is_production()))
        .with_state(state)
}

/// CORS for the whole router
fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if config.allows_any_origin() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .api
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(origins)
}
