mod config;
mod dto;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod store;
mod utils;

use std::time::Duration;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::mysql::MySqlPoolOptions;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppState, Config, StoreBackend};
use crate::handlers::{
    auth::{login_form_handler, login_handler, logout_handler},
    oauth::{approve_handler, authorize_handler, refuse_handler, token_handler},
    user::me_handler,
};
use crate::middleware::bearer_auth_middleware;
use crate::store::Stores;
use crate::utils::clock::Clock;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create the application router with all routes configured
///
/// # Routes
///
/// ## Authorization flow (session-based)
/// - GET /authorize - Start a code or implicit grant
/// - GET /login - Login form
/// - POST /login - Credential submission (CSRF-protected, content-negotiated)
/// - POST /approve - User consent for the pending authorize request
/// - GET /refuse - User denial of the pending authorize request
/// - GET /logout - Destroy the session
///
/// ## Token endpoint
/// - POST /token - Grant exchange (Basic or body client authentication)
///
/// ## Protected resources (bearer token required)
/// - GET /users/me - Profile of the token's resource owner
pub fn create_router(state: AppState) -> Router {
    let authorize_routes = Router::new()
        .route("/authorize", get(authorize_handler))
        .route("/login", get(login_form_handler).post(login_handler))
        .route("/approve", post(approve_handler))
        .route("/refuse", get(refuse_handler))
        .route("/logout", get(logout_handler))
        .route("/token", post(token_handler));

    let protected_user_routes = Router::new()
        .route("/me", get(me_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(authorize_routes)
        .nest("/users", protected_user_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oauth2_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let addr = config.socket_addr()?;

    // Wire the selected store backend
    let stores = match config.store_backend {
        StoreBackend::Memory => Stores::in_memory(),
        StoreBackend::MySql => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(&config.database_url)
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;
            Stores::mysql(pool)
        }
    };

    let state = AppState::new(stores, config, Clock::system());
    let app = create_router(state);

    tracing::info!(
        "OAuth2 server v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
