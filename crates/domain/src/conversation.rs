use serde::{Deserialize, Serialize};

use crate::event::{AgentId, ConversationId, UnifiedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
}

/// Opaque metadata attached to a conversation at creation time. The
/// orchestrator only reads `agents` (for scheduling rotation) and
/// `scenario`; everything else is carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetadata {
    /// Ordered list of participating agent ids; also the rotation order used
    /// by the scheduler's tie-break rule.
    pub agents: Vec<AgentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConversationMetadata {
    pub fn new(agents: Vec<AgentId>) -> Self {
        Self {
            agents,
            scenario: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A point-in-time view of a conversation: its full event list plus the
/// derived fields a caller needs without re-walking the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub conversation: ConversationId,
    pub status: ConversationStatus,
    pub metadata: ConversationMetadata,
    pub last_closed_seq: u64,
    pub events: Vec<UnifiedEvent>,
}

/// `currentTurn(S)`: the highest turn number among non-system events, or 0.
pub fn current_turn(events: &[UnifiedEvent]) -> u64 {
    events
        .iter()
        .filter(|e| !e.is_system())
        .map(|e| e.turn)
        .max()
        .unwrap_or(0)
}

/// Events belonging to the given turn, in append order, system events excluded.
fn turn_events(events: &[UnifiedEvent], turn: u64) -> impl Iterator<Item = &UnifiedEvent> {
    events.iter().filter(move |e| !e.is_system() && e.turn == turn)
}

/// `closed(S)`: some event in `currentTurn(S)` closes it. An empty log
/// (`currentTurn == 0`) counts as closed — there is no turn to be open.
pub fn is_closed(events: &[UnifiedEvent]) -> bool {
    let turn = current_turn(events);
    if turn == 0 {
        return true;
    }
    turn_events(events, turn).any(|e| e.closes_turn())
}

/// `hasOpenTurn(S)`.
pub fn has_open_turn(events: &[UnifiedEvent]) -> bool {
    current_turn(events) > 0 && !is_closed(events)
}

/// `ownerAgentId(S)`: the author of the last non-system event in the current
/// turn, only meaningful when `has_open_turn`.
pub fn owner_agent_id(events: &[UnifiedEvent]) -> Option<&AgentId> {
    if !has_open_turn(events) {
        return None;
    }
    turn_events(events, current_turn(events)).last().map(|e| &e.agent_id)
}

/// The agent that closed the current turn, if it is in fact closed (used by
/// the scheduler's rotation rule). `None` on an empty log or an open turn.
pub fn last_turn_closer(events: &[UnifiedEvent]) -> Option<&AgentId> {
    let turn = current_turn(events);
    if turn == 0 {
        return None;
    }
    turn_events(events, turn)
        .last()
        .filter(|e| e.closes_turn())
        .map(|e| &e.agent_id)
}

impl Snapshot {
    /// `currentTurn(S)`: the highest turn number among non-system events, or 0.
    pub fn current_turn(&self) -> u64 {
        current_turn(&self.events)
    }

    /// `closed(S)`: some event in the current turn closes it.
    pub fn is_closed(&self) -> bool {
        is_closed(&self.events)
    }

    /// `hasOpenTurn(S)`.
    pub fn has_open_turn(&self) -> bool {
        has_open_turn(&self.events)
    }

    /// `ownerAgentId(S)`: the author of the last non-system event in the
    /// current turn, only meaningful when `has_open_turn()`.
    pub fn owner_agent_id(&self) -> Option<&AgentId> {
        owner_agent_id(&self.events)
    }

    /// The agent that closed the current turn, if any.
    pub fn last_turn_closer(&self) -> Option<&AgentId> {
        last_turn_closer(&self.events)
    }
}
