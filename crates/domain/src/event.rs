use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;

/// Identifies a conversation. Assigned monotonically by the store that creates it.
pub type ConversationId = u64;

/// Opaque agent identifier, stable for the lifetime of a conversation.
pub type AgentId = String;

/// Controls whether a message closes the current turn, the whole
/// conversation, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finality {
    None,
    Turn,
    Conversation,
}

impl Finality {
    pub fn closes_turn(self) -> bool {
        matches!(self, Finality::Turn | Finality::Conversation)
    }

    pub fn closes_conversation(self) -> bool {
        matches!(self, Finality::Conversation)
    }
}

/// Payload carried by a `message` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
}

/// Payload carried by a `trace` event. Always `finality = none` at the event
/// level; traces never close a turn directly except `turn_cleared`, which the
/// bus treats as a close for guidance purposes (see `TracePayload::closes_turn`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TracePayload {
    Thought { text: String },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        result: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    TurnCleared,
}

impl TracePayload {
    /// Whether this trace closes the turn it was appended to, for scheduling
    /// purposes. Only `turn_cleared` does.
    pub fn closes_turn(&self) -> bool {
        matches!(self, TracePayload::TurnCleared)
    }
}

/// Orchestrator-authored notice. Always appended at `turn = 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystemPayload {
    ConversationCompleted,
    Note { text: String },
}

/// The payload-specific half of a unified event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Message(MessagePayload),
    Trace(TracePayload),
    System(SystemPayload),
}

impl EventBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventBody::Message(_) => "message",
            EventBody::Trace(_) => "trace",
            EventBody::System(_) => "system",
        }
    }

    /// `finality` is only meaningful on `message` events; every other event
    /// is always `Finality::None`.
    pub fn finality(&self) -> Finality {
        match self {
            EventBody::Message(_) => Finality::None,
            _ => Finality::None,
        }
    }
}

/// A single record in a conversation's append-only log.
///
/// `(conversation, turn, event, seq)` together identify this record uniquely;
/// `seq` alone is sufficient for ordering within one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedEvent {
    pub conversation: ConversationId,
    pub turn: u64,
    pub event: u64,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub agent_id: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finality: Option<Finality>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl UnifiedEvent {
    /// `message`/`trace`/`system`.
    pub fn type_name(&self) -> &'static str {
        self.body.type_name()
    }

    /// Effective finality: `none` for anything that isn't a message.
    pub fn effective_finality(&self) -> Finality {
        self.finality.unwrap_or(Finality::None)
    }

    /// True for `system` events, which are not attributed to a turn.
    pub fn is_system(&self) -> bool {
        matches!(self.body, EventBody::System(_))
    }

    /// True if this event closes the turn it belongs to: a message with
    /// `finality ∈ {turn, conversation}`, or a `turn_cleared` trace.
    pub fn closes_turn(&self) -> bool {
        match &self.body {
            EventBody::Message(_) => self.effective_finality().closes_turn(),
            EventBody::Trace(t) => t.closes_turn(),
            EventBody::System(_) => false,
        }
    }
}

/// A proposal to append a new event; the store assigns `event`, `seq`, and
/// `ts`, and validates or assigns `turn` per the turn state machine.
#[derive(Debug, Clone)]
pub struct AppendProposal {
    pub agent_id: AgentId,
    pub body: EventBody,
    pub finality: Option<Finality>,
    pub turn: Option<u64>,
    pub client_request_id: Option<String>,
}

impl AppendProposal {
    pub fn message(agent_id: impl Into<AgentId>, text: impl Into<String>, finality: Finality) -> Self {
        Self {
            agent_id: agent_id.into(),
            body: EventBody::Message(MessagePayload {
                text: text.into(),
                attachments: Vec::new(),
                client_request_id: None,
            }),
            finality: Some(finality),
            turn: None,
            client_request_id: None,
        }
    }

    pub fn trace(agent_id: impl Into<AgentId>, payload: TracePayload) -> Self {
        Self {
            agent_id: agent_id.into(),
            body: EventBody::Trace(payload),
            finality: None,
            turn: None,
            client_request_id: None,
        }
    }

    pub fn with_turn(mut self, turn: u64) -> Self {
        self.turn = Some(turn);
        self
    }

    pub fn with_client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = Some(id.into());
        self
    }
}
