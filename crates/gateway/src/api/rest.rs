//! The small REST surface (§6.3): create a conversation, start it, and read
//! back a snapshot. Everything event-shaped beyond that rides the WebSocket
//! or SSE endpoints instead.

use axum::extract::{Path, State};
use axum::Json;
use conclave_domain::{AgentId, ConversationId};
use conclave_protocol::GetConversationResult;
use serde::Deserialize;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub agents: Vec<AgentId>,
}

#[derive(Debug, serde::Serialize)]
pub struct CreateConversationResponse {
    pub conversation: ConversationId,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Json(body): Json<CreateConversationRequest>,
) -> Json<CreateConversationResponse> {
    let conversation = state.create_conversation(body.agents);
    Json(CreateConversationResponse { conversation })
}

pub async fn start_conversation(
    State(state): State<AppState>,
    Path(conversation): Path<ConversationId>,
) -> Result<(), ApiError> {
    state.orchestrator.start_conversation(conversation)?;
    Ok(())
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation): Path<ConversationId>,
) -> Result<Json<GetConversationResult>, ApiError> {
    let snapshot = state.orchestrator.get_snapshot(conversation)?;
    Ok(Json(GetConversationResult::from(&snapshot)))
}
