//! # StockWatch API Server
//!
//! JSON backend for the StockWatch dashboard: accounts and password reset,
//! tracked products, user settings, premium subscriptions, Discord server
//! premium and donations.
//!
//! ## Architecture
//!
//! The server is built with Axum and provides:
//! - JWT authentication (access + refresh tokens)
//! - A stored-procedure gateway in front of MySQL
//! - Checkout sessions and signed webhooks through the Stripe REST API
//!
//! ## Usage
//!
//! ```bash
//! STOCKWATCH_ENV=development cargo run -p stockwatch-api
//! ```

use std::sync::Arc;
use stockwatch_api::{
    app::{build_router, AppState},
    config::Config,
};
use stockwatch_shared::{
    db::{
        gateway::MySqlGateway,
        pool::{close_pool, create_pool, DatabaseConfig},
    },
    notify::LogMailer,
    payments::StripeClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration is read before logging so the environment picks the format
    let config = Config::from_env()?;

    init_tracing(config.is_production());

    tracing::info!(
        environment = %config.environment,
        "StockWatch API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let pool = create_pool(DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await?;

    let stripe = StripeClient::new(&config.payments.secret_key, &config.payments.api_base)?;
    if config.payments.secret_key.is_empty() {
        tracing::warn!("STRIPE_SECRET_KEY is not set; payment routes will fail");
    }

    let bind_address = config.bind_address();
    let state = AppState::new(
        Arc::new(MySqlGateway::new(pool.clone())),
        Arc::new(stripe),
        Arc::new(LogMailer),
        config,
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, closing database pool...");
    close_pool(pool).await;

    Ok(())
}

fn init_tracing(json: bool) {
    let default_filter = if json {
        "warn"
    } else {
        "stockwatch_api=debug,stockwatch_shared=debug,tower_http=debug"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for the shutdown signal");
    }
}
