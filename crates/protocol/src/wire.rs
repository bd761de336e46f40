//! Wire-shape types: the exact JSON a remote client sends and receives.
//!
//! These are deliberately distinct from the internal `conclave_domain` types
//! (which use `snake_case` and Rust-native representations like
//! `chrono::DateTime`) so that the wire format can be pinned independently of
//! internal refactors.

use conclave_domain::{
    AgentId, ConversationId, Error, EventBody, Finality, GuidanceEvent, GuidanceKind, MessagePayload, SystemPayload,
    TracePayload, UnifiedEvent,
};
use serde::{Deserialize, Serialize};

/// A unified event as it appears on the wire: RFC 3339 timestamp, camelCase
/// field names, `finality` only present for messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub conversation: ConversationId,
    pub turn: u64,
    pub event: u64,
    pub seq: u64,
    pub ts: String,
    pub agent_id: AgentId,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finality: Option<Finality>,
    pub payload: serde_json::Value,
}

impl From<&UnifiedEvent> for WireEvent {
    fn from(e: &UnifiedEvent) -> Self {
        let payload = match &e.body {
            EventBody::Message(m) => serde_json::to_value(m).unwrap_or(serde_json::Value::Null),
            EventBody::Trace(t) => serde_json::to_value(t).unwrap_or(serde_json::Value::Null),
            EventBody::System(s) => serde_json::to_value(s).unwrap_or(serde_json::Value::Null),
        };
        WireEvent {
            conversation: e.conversation,
            turn: e.turn,
            event: e.event,
            seq: e.seq,
            ts: e.ts.to_rfc3339(),
            agent_id: e.agent_id.clone(),
            type_name: e.type_name().to_string(),
            finality: if matches!(e.body, EventBody::Message(_)) {
                Some(e.effective_finality())
            } else {
                None
            },
            payload,
        }
    }
}

/// Guidance as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireGuidance {
    #[serde(rename = "type")]
    pub type_name: String,
    pub conversation: ConversationId,
    pub next_agent_id: AgentId,
    pub kind: GuidanceKind,
    pub turn: u64,
    pub seq: u64,
    pub deadline_ms: u64,
}

impl From<&GuidanceEvent> for WireGuidance {
    fn from(g: &GuidanceEvent) -> Self {
        WireGuidance {
            type_name: "guidance".to_string(),
            conversation: g.conversation,
            next_agent_id: g.next_agent_id.clone(),
            kind: g.kind,
            turn: g.turn,
            seq: g.seq,
            deadline_ms: g.deadline_ms,
        }
    }
}

impl TryFrom<&WireEvent> for UnifiedEvent {
    type Error = Error;

    fn try_from(w: &WireEvent) -> Result<Self, Error> {
        let ts = chrono::DateTime::parse_from_rfc3339(&w.ts)
            .map_err(|e| Error::InvalidArgument(format!("bad event timestamp: {e}")))?
            .with_timezone(&chrono::Utc);
        let body = match w.type_name.as_str() {
            "message" => EventBody::Message(
                serde_json::from_value::<MessagePayload>(w.payload.clone()).map_err(Error::Json)?,
            ),
            "trace" => {
                EventBody::Trace(serde_json::from_value::<TracePayload>(w.payload.clone()).map_err(Error::Json)?)
            }
            "system" => {
                EventBody::System(serde_json::from_value::<SystemPayload>(w.payload.clone()).map_err(Error::Json)?)
            }
            other => return Err(Error::InvalidArgument(format!("unknown event type: {other}"))),
        };
        Ok(UnifiedEvent {
            conversation: w.conversation,
            turn: w.turn,
            event: w.event,
            seq: w.seq,
            ts,
            agent_id: w.agent_id.clone(),
            finality: w.finality,
            body,
        })
    }
}

impl From<&WireGuidance> for GuidanceEvent {
    fn from(w: &WireGuidance) -> Self {
        GuidanceEvent {
            conversation: w.conversation,
            next_agent_id: w.next_agent_id.clone(),
            kind: w.kind,
            turn: w.turn,
            seq: w.seq,
            deadline_ms: w.deadline_ms,
        }
    }
}

/// Either half of what an event stream listener observes, tagged for the
/// wire (server-initiated WebSocket notification or SSE payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireStreamItem {
    Event(WireEvent),
    Guidance(WireGuidance),
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::MessagePayload;
    use chrono::Utc;

    #[test]
    fn message_event_carries_finality_on_the_wire() {
        let e = UnifiedEvent {
            conversation: 1,
            turn: 1,
            event: 1,
            seq: 1,
            ts: Utc::now(),
            agent_id: "alice".into(),
            finality: Some(Finality::Turn),
            body: EventBody::Message(MessagePayload {
                text: "hi".into(),
                attachments: vec![],
                client_request_id: None,
            }),
        };
        let wire = WireEvent::from(&e);
        assert_eq!(wire.type_name, "message");
        assert_eq!(wire.finality, Some(Finality::Turn));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["agentId"], "alice");
    }

    #[test]
    fn wire_event_round_trips_back_to_a_unified_event() {
        let e = UnifiedEvent {
            conversation: 7,
            turn: 2,
            event: 3,
            seq: 9,
            ts: Utc::now(),
            agent_id: "bob".into(),
            finality: Some(Finality::None),
            body: EventBody::Message(MessagePayload {
                text: "hey".into(),
                attachments: vec![],
                client_request_id: Some("req-1".into()),
            }),
        };
        let wire = WireEvent::from(&e);
        let back = UnifiedEvent::try_from(&wire).unwrap();
        assert_eq!(back.conversation, 7);
        assert_eq!(back.seq, 9);
        assert_eq!(back.agent_id, "bob");
    }
}
