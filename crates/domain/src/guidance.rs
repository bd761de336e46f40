use serde::{Deserialize, Serialize};

use crate::event::{AgentId, ConversationId};

/// Transient directive telling a specific agent to start or continue a turn.
/// Never persisted to the event log; `seq` here is the bus's local fan-out
/// sequence, unrelated to log `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "guidance")]
pub struct GuidanceEvent {
    pub conversation: ConversationId,
    pub next_agent_id: AgentId,
    pub kind: GuidanceKind,
    pub turn: u64,
    pub seq: u64,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceKind {
    StartTurn,
    ContinueTurn,
}
