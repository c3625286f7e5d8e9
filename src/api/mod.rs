pub mod auth;
pub mod handlers;
pub mod models;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::config::AppConfig;
use crate::downloader::fallback::FallbackController;
use crate::downloader::store::DownloadStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub controller: Arc<FallbackController>,
    pub store: Arc<DownloadStore>,
}

/// Health is open; everything under /api sits behind the API-key gate.
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/info", post(handlers::info))
        .route("/api/download", post(handlers::download))
        .route("/api/stream", post(handlers::stream))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .fallback(handlers::not_found)
        .with_state(state)
}
