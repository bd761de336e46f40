//! Scheduling policy (§4.4): decide who goes next and build the guidance
//! event. Pure function of a snapshot plus a monotonic bus-local sequence
//! counter for the emitted guidance.

use conclave_domain::{ConversationStatus, GuidanceEvent, GuidanceKind, Snapshot};

/// `next_guidance` implements the three numbered cases in §4.4: nothing once
/// completed, `continue_turn` for a reconnecting owner, otherwise rotate to
/// the next agent in declared order and emit `start_turn`.
pub fn next_guidance(snapshot: &Snapshot, deadline_ms: u64, guidance_seq: u64) -> Option<GuidanceEvent> {
    if snapshot.status == ConversationStatus::Completed {
        return None;
    }

    if snapshot.has_open_turn() {
        let owner = snapshot.owner_agent_id()?.clone();
        return Some(GuidanceEvent {
            conversation: snapshot.conversation,
            next_agent_id: owner,
            kind: GuidanceKind::ContinueTurn,
            turn: snapshot.current_turn(),
            seq: guidance_seq,
            deadline_ms,
        });
    }

    let agents = &snapshot.metadata.agents;
    if agents.is_empty() {
        return None;
    }
    let next_agent = match snapshot.last_turn_closer() {
        Some(closer) => {
            let idx = agents.iter().position(|a| a == closer).unwrap_or(0);
            agents[(idx + 1) % agents.len()].clone()
        }
        None => agents[0].clone(),
    };

    Some(GuidanceEvent {
        conversation: snapshot.conversation,
        next_agent_id: next_agent,
        kind: GuidanceKind::StartTurn,
        turn: snapshot.current_turn() + 1,
        seq: guidance_seq,
        deadline_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::{ConversationMetadata, EventBody, Finality, MessagePayload, UnifiedEvent};
    use chrono::Utc;

    fn snapshot(agents: Vec<&str>, events: Vec<UnifiedEvent>, status: ConversationStatus) -> Snapshot {
        Snapshot {
            conversation: 1,
            status,
            metadata: ConversationMetadata::new(agents.into_iter().map(String::from).collect()),
            last_closed_seq: 0,
            events,
        }
    }

    fn message(turn: u64, event: u64, seq: u64, agent: &str, finality: Finality) -> UnifiedEvent {
        UnifiedEvent {
            conversation: 1,
            turn,
            event,
            seq,
            ts: Utc::now(),
            agent_id: agent.to_string(),
            finality: Some(finality),
            body: EventBody::Message(MessagePayload {
                text: "x".into(),
                attachments: vec![],
                client_request_id: None,
            }),
        }
    }

    #[test]
    fn empty_conversation_starts_with_first_declared_agent() {
        let snap = snapshot(vec!["alice", "bob"], vec![], ConversationStatus::Active);
        let guidance = next_guidance(&snap, 30_000, 1).unwrap();
        assert_eq!(guidance.kind, GuidanceKind::StartTurn);
        assert_eq!(guidance.next_agent_id, "alice");
        assert_eq!(guidance.turn, 1);
    }

    #[test]
    fn open_turn_yields_continue_turn_for_the_owner() {
        let snap = snapshot(
            vec!["alice", "bob"],
            vec![message(1, 1, 1, "alice", Finality::None)],
            ConversationStatus::Active,
        );
        let guidance = next_guidance(&snap, 30_000, 1).unwrap();
        assert_eq!(guidance.kind, GuidanceKind::ContinueTurn);
        assert_eq!(guidance.next_agent_id, "alice");
        assert_eq!(guidance.turn, 1);
    }

    #[test]
    fn closed_turn_rotates_to_the_next_agent() {
        let snap = snapshot(
            vec!["alice", "bob"],
            vec![message(1, 1, 1, "alice", Finality::Turn)],
            ConversationStatus::Active,
        );
        let guidance = next_guidance(&snap, 30_000, 1).unwrap();
        assert_eq!(guidance.next_agent_id, "bob");
        assert_eq!(guidance.turn, 2);
    }

    #[test]
    fn completed_conversation_emits_nothing() {
        let snap = snapshot(
            vec!["alice", "bob"],
            vec![message(1, 1, 1, "alice", Finality::Conversation)],
            ConversationStatus::Completed,
        );
        assert!(next_guidance(&snap, 30_000, 1).is_none());
    }
}
