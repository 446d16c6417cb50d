use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub question: String,
    pub contact: Option<String>,
}

/// Escalation is caller-initiated: the pipeline only surfaces the TICKET
/// action, this endpoint actually records the ticket.
pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTicketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.question.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "question must not be empty".to_string(),
        ));
    }

    let ticket_id = state
        .tickets
        .create_ticket(&payload.question, payload.contact.as_deref())?;
    Ok(Json(json!({ "ticket_id": ticket_id })))
}
