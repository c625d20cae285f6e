//! API route definitions.

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use crate::ws;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);
    let max_body_size = state.config.server.max_upload_size_mb * 1024 * 1024;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/models", get(handlers::list_models))
        .route(
            "/conversations",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}",
            axum::routing::delete(handlers::delete_conversation),
        )
        .route(
            "/conversations/{conversation_id}/rename",
            post(handlers::rename_conversation),
        )
        .route(
            "/conversations/{conversation_id}/pin",
            post(handlers::pin_conversation),
        )
        .route(
            "/conversations/{conversation_id}/unpin",
            post(handlers::unpin_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(handlers::list_messages),
        )
        .route("/stt", post(handlers::speech_to_text))
        .route("/tts", post(handlers::stream_tts))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(cors)
        .layer(trace_layer)
        .with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let origins = &state.config.server.cors_origins;
    if origins.is_empty() {
        // No explicit origins configured: reflect whatever asks, the way
        // the single-tenant deployment expects.
        cors.allow_origin(AllowOrigin::mirror_request())
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        cors.allow_origin(parsed)
    }
}
