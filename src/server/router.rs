use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::handlers::{ask, health, index, sessions, tickets};
use crate::state::AppState;

/// Creates the application router: the answer pipeline, session history,
/// ticket escalation, and index administration, behind CORS and request
/// tracing.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/ask", post(ask::ask))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/:session_id", delete(sessions::delete_session))
        .route(
            "/api/sessions/:session_id/messages",
            get(sessions::get_session_messages),
        )
        .route("/api/tickets", post(tickets::create_ticket))
        .route("/api/index/rebuild", post(index::rebuild))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
