//! Typed request/response shapes for each JSON-RPC method in §6.1. These are
//! what `RpcRequest::params`/`RpcOutcome::Ok::result` deserialize into; the
//! untyped envelope in `jsonrpc` stays agnostic to method-specific shapes.

use conclave_domain::{AgentId, Attachment, AttachmentRow, ConversationId, ConversationMetadata, ConversationStatus, Finality, TracePayload};
use serde::{Deserialize, Serialize};

use crate::wire::WireEvent;

pub const METHOD_GET_CONVERSATION: &str = "getConversation";
pub const METHOD_SEND_MESSAGE: &str = "sendMessage";
pub const METHOD_SEND_TRACE: &str = "sendTrace";
pub const METHOD_CLEAR_TURN: &str = "clearTurn";
pub const METHOD_GET_ATTACHMENT: &str = "getAttachmentByDocId";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConversationParams {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub include_scenario: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayloadWire {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    pub conversation_id: ConversationId,
    pub agent_id: AgentId,
    pub message_payload: MessagePayloadWire,
    pub finality: Finality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTraceParams {
    pub conversation_id: ConversationId,
    pub agent_id: AgentId,
    pub trace_payload: TracePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearTurnParams {
    pub conversation_id: ConversationId,
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAttachmentParams {
    pub conversation_id: ConversationId,
    pub doc_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResult {
    pub conversation: ConversationId,
    pub seq: u64,
    pub turn: u64,
    pub event: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearTurnResult {
    pub turn: u64,
}

pub type GetAttachmentResult = Option<AttachmentRow>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConversationResult {
    pub conversation: ConversationId,
    pub status: ConversationStatus,
    pub metadata: ConversationMetadata,
    pub last_closed_seq: u64,
    pub events: Vec<WireEvent>,
}

impl From<&conclave_domain::Snapshot> for GetConversationResult {
    fn from(s: &conclave_domain::Snapshot) -> Self {
        GetConversationResult {
            conversation: s.conversation,
            status: s.status,
            metadata: s.metadata.clone(),
            last_closed_seq: s.last_closed_seq,
            events: s.events.iter().map(WireEvent::from).collect(),
        }
    }
}

impl TryFrom<&GetConversationResult> for conclave_domain::Snapshot {
    type Error = conclave_domain::Error;

    fn try_from(r: &GetConversationResult) -> Result<Self, Self::Error> {
        let events = r
            .events
            .iter()
            .map(conclave_domain::UnifiedEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conclave_domain::Snapshot {
            conversation: r.conversation,
            status: r.status,
            metadata: r.metadata.clone(),
            last_closed_seq: r.last_closed_seq,
            events,
        })
    }
}
