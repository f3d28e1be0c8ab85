use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use super::app_state::AppState;
use super::rate_limit::{api_rate_limit, ws_rate_limit};
use super::{rest_api, ws_handler};

/// Largest accepted REST request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Any origin during local development, otherwise only the frontend
    let public_url = &state.public_url;
    let cors = if public_url.contains("localhost") || public_url.contains("127.0.0.1") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = public_url
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("https://localhost"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Upgrades are limited per IP separately from REST calls
    let ws_routes = Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .layer(axum::middleware::from_fn(ws_rate_limit));

    let api_routes = Router::new()
        .route("/api/looprooms", post(rest_api::create_looproom))
        .route("/api/looprooms/{id}", get(rest_api::get_looproom))
        .route(
            "/api/looprooms/{id}/participants",
            get(rest_api::list_participants),
        )
        .route("/api/looprooms/{id}/messages", get(rest_api::get_messages))
        .route(
            "/api/looprooms/{id}/messages/{message_id}",
            delete(rest_api::delete_message),
        )
        .route(
            "/api/looprooms/{id}/messages/{message_id}/pin",
            post(rest_api::pin_message).delete(rest_api::unpin_message),
        )
        .route("/api/looprooms/{id}/start", post(rest_api::start_session))
        .route("/api/looprooms/{id}/end", post(rest_api::end_session))
        .route("/api/looprooms/{id}/pause", post(rest_api::pause_session))
        .route("/api/looprooms/{id}/resume", post(rest_api::resume_session))
        .route("/api/looprooms/{id}/session", get(rest_api::get_session))
        .route(
            "/api/looprooms/{id}/moderation-log",
            get(rest_api::get_moderation_log),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(api_rate_limit));

    Router::new()
        .route("/health", get(rest_api::health))
        .merge(ws_routes)
        .merge(api_routes)
        .layer(cors)
        // Inject rate limiters into all request extensions
        .layer(axum::Extension(state.http_limiters.clone()))
        .with_state(state)
}
