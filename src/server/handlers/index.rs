use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::ingest::build_index;
use crate::state::AppState;

/// Re-ingests the knowledge base and swaps in the new index. Rebuilds are
/// serialized; a concurrent request waits for the running one to finish.
pub async fn rebuild(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.rebuild_lock.lock().await;
    let chunks = build_index(&state.settings, state.provider.as_ref()).await?;
    Ok(Json(json!({ "chunks": chunks })))
}
