//! # aqsurvey HTTP API Module
//!
//! Participant-facing REST API over a shared [`Experiment`].
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check (never authenticated)
//! - `GET /status` - Experiment counters
//! - `POST /participants` - Enroll, or resume an existing id
//! - `GET /participants/{id}` - Current step, visible fields and drafts
//! - `POST /participants/{id}/values` - Store a draft value
//! - `POST /participants/{id}/advance` - Validate and leave the step
//! - `POST /participants/{id}/rewind` - Go back one step
//! - `POST /participants/{id}/disconnect` - Park the session
//! - `POST /participants/{id}/reconnect` - Resume the session
//! - `GET /participants/{id}/records` - Committed answers
//! - `GET /participants/{id}/bonus` - Payment amount
//!
//! Security settings (CORS origins, rate limits, API key) come from the
//! `[server]` section of the config, see [`crate::config`].

mod auth;
mod error;
mod handlers;
mod middleware;
mod types;

pub use auth::{ApiKey, keys_match};
pub use error::ApiError;
pub use middleware::{RateLimits, participant_from_path};
pub use types::{
    AdvanceResponse, BonusResponse, EnrollRequest, ErrorResponse, HealthResponse, RecordsResponse,
    RewindResponse, SetValueRequest, ValueInput,
};

use crate::config::ServerConfig;
use aqsurvey_core::{Experiment, FlatBonus, SurveyError};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Request bodies above this size are refused.
const MAX_BODY_SIZE: usize = 256 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub experiment: Arc<RwLock<Experiment>>,
    pub bonus: FlatBonus,
}

impl AppState {
    #[must_use]
    pub fn new(experiment: Experiment, bonus: FlatBonus) -> Self {
        Self {
            experiment: Arc::new(RwLock::new(experiment)),
            bonus,
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// CORS layer for the configured origins.
///
/// - `"*"`: any origin (development only)
/// - comma-separated list: exactly those origins
/// - unset, or no valid entry: localhost only
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    let Some(origins) = origins else {
        tracing::info!("CORS: no origins configured, allowing localhost only");
        return localhost_cors();
    };

    if origins.trim() == "*" {
        tracing::warn!("CORS: allowing ALL origins. Do not use this in production.");
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => {
                tracing::info!("CORS: allowing origin {}", origin);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("CORS: invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        tracing::warn!("CORS: no valid origins configured, allowing localhost only");
        return localhost_cors();
    }
    restricted_cors(allowed)
}

fn localhost_cors() -> CorsLayer {
    let origins = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    restricted_cors(origins)
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with all endpoints and middleware.
///
/// Middleware stack (outer to inner): tracing, CORS, body limit, rate
/// limiting, authentication.
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let limits = RateLimits::new(server.rate_limit, server.participant_rate_limit);
    if limits.is_enabled() {
        tracing::info!(
            global_rps = server.rate_limit,
            participant_rps = server.participant_rate_limit,
            "Rate limiting enabled"
        );
    } else {
        tracing::info!("Rate limiting disabled");
    }

    let api_key: Option<ApiKey> = server
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .map(Arc::from);
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED: all endpoints are publicly accessible. \
             Set AQSURVEY_API_KEY to enable it."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/participants", post(handlers::enroll_handler))
        .route("/participants/{id}", get(handlers::view_handler))
        .route("/participants/{id}/values", post(handlers::set_value_handler))
        .route("/participants/{id}/advance", post(handlers::advance_handler))
        .route("/participants/{id}/rewind", post(handlers::rewind_handler))
        .route(
            "/participants/{id}/disconnect",
            post(handlers::disconnect_handler),
        )
        .route(
            "/participants/{id}/reconnect",
            post(handlers::reconnect_handler),
        )
        .route("/participants/{id}/records", get(handlers::records_handler))
        .route("/participants/{id}/bonus", get(handlers::bonus_handler));

    if let Some(key) = api_key {
        router = router.layer(axum_middleware::from_fn_with_state(
            key,
            auth::api_key_auth_middleware,
        ));
    }

    if limits.is_enabled() {
        router = router.layer(axum_middleware::from_fn_with_state(
            limits,
            middleware::rate_limit_middleware,
        ));
    }

    // Outermost first: trace sees every request, including rejected ones.
    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(server.cors_origins.as_deref()))
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve until Ctrl+C.
pub async fn run_server(server: &ServerConfig, state: AppState) -> Result<(), SurveyError> {
    let addr = server.addr();
    let router = create_router(state, server);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SurveyError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("aqsurvey HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| SurveyError::IoError(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
