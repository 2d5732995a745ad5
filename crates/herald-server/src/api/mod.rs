//! HTTP API.
//!
//! JSON endpoints under `/api`, the live notification stream, and read-back
//! of stored attachments under the public upload prefix.

mod applications;
mod devices;
pub mod error;
mod notifications;
mod stream;
mod versions;

use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, header};
use axum::routing::{delete, get, post};
use herald_core::ServerConfig;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::dispatcher::NotificationDispatcher;
use crate::versions::VersionStore;

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub versions: VersionStore,
    pub dispatcher: NotificationDispatcher,
    /// Interval between keep-alive comments on live streams.
    pub keep_alive: Duration,
}

/// Build the full router: API, health check and attachment read-back.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let upload_prefix = config.public_upload_prefix.trim_end_matches('/');

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes(state))
        .nest_service(upload_prefix, ServeDir::new(&config.upload_dir))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(CorsLayer::permissive())
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/applications",
            get(applications::list).post(applications::register),
        )
        .route("/applications/{app_key}", get(applications::get))
        .route(
            "/applications/{app_key}/activate",
            post(applications::activate),
        )
        .route(
            "/applications/{app_key}/deactivate",
            post(applications::deactivate),
        )
        .route("/app-versions", get(versions::list).post(versions::create))
        .route("/app-versions/check", get(versions::check))
        .route("/app-versions/{id}", get(versions::get))
        .route(
            "/notifications",
            get(notifications::list).post(notifications::publish),
        )
        .route("/notifications/form", post(notifications::publish_form))
        .route("/notifications/stream", get(stream::notification_stream))
        .route("/notifications/clear", post(notifications::clear))
        .route("/notifications/{id}", delete(notifications::deactivate))
        .route("/devices/{device_id}/version", post(devices::report_version))
        .route("/devices/{device_id}/notifications", get(devices::inbox))
        .route(
            "/devices/{device_id}/notifications/{id}/read",
            post(devices::mark_read),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .with_state(state)
}

/// `GET /health`
async fn health() -> &'static str {
    "ok"
}
