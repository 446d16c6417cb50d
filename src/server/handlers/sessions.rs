use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions: Vec<Value> = state
        .history
        .list_sessions()
        .into_iter()
        .map(|(id, message_count)| {
            json!({
                "id": id,
                "message_count": message_count,
            })
        })
        .collect();
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn get_session_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let messages: Vec<Value> = state
        .history
        .get_history(&session_id)
        .into_iter()
        .map(|turn| {
            json!({
                "role": turn.role,
                "content": turn.content,
            })
        })
        .collect();
    Ok(Json(json!({
        "session_id": session_id,
        "messages": messages,
    })))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.history.delete_session(&session_id) {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }
    Ok(Json(json!({ "deleted": session_id })))
}
