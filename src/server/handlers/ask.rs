use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub session_id: Option<String>,
}

/// Runs one question through the answer pipeline. A missing session id
/// mints a fresh one, returned alongside the response so the client can
/// keep the conversation going.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = payload.session_id.unwrap_or_else(new_session_id);
    let response = state.bot.answer(&payload.question, &session_id).await;
    Ok(Json(json!({
        "session_id": session_id,
        "response": response,
    })))
}

fn new_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("S-{}", &hex[..8])
}
