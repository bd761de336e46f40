//! C1: the event log. An in-memory, trait-bounded store; a SQL-backed store
//! would implement the same `EventStore` trait (see §4.1 of the design doc).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use conclave_domain::{
    AppendProposal, AttachmentRow, ConversationId, ConversationMetadata, ConversationStatus, Error,
    EventBody, Result, Snapshot, SystemPayload, TracePayload, UnifiedEvent,
};
use parking_lot::Mutex;

/// Result of a successful append: the event itself, plus a companion
/// `system` event when the append also completed the conversation.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub event: UnifiedEvent,
    pub completion_notice: Option<UnifiedEvent>,
}

/// Result of `clear_turn`: the turn number the caller may safely open next,
/// plus the abort marker if one was actually appended (absent on the no-op path).
#[derive(Debug, Clone)]
pub struct ClearTurnOutcome {
    pub turn: u64,
    pub appended: Option<UnifiedEvent>,
}

/// A fixed-capacity, oldest-evicted cache mapping `clientRequestId` to the
/// append result it originally produced. Bounded per §9 open question 3.
struct DedupCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, (u64, u64, u64)>,
}

impl DedupCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<(u64, u64, u64)> {
        self.entries.get(key).copied()
    }

    fn insert(&mut self, key: String, value: (u64, u64, u64)) {
        if self.entries.contains_key(&key) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }
}

fn dedup_key(agent_id: &str, client_request_id: &str) -> String {
    format!("{agent_id}\u{0}{client_request_id}")
}

struct ConversationState {
    metadata: ConversationMetadata,
    status: ConversationStatus,
    events: Vec<UnifiedEvent>,
    last_closed_seq: u64,
    seq_counter: u64,
    dedup: DedupCache,
    attachments: HashMap<String, AttachmentRow>,
}

impl ConversationState {
    fn new(metadata: ConversationMetadata, dedup_capacity: usize) -> Self {
        Self {
            metadata,
            status: ConversationStatus::Active,
            events: Vec::new(),
            last_closed_seq: 0,
            seq_counter: 0,
            dedup: DedupCache::new(dedup_capacity),
            attachments: HashMap::new(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq_counter += 1;
        self.seq_counter
    }

    fn next_event_in_turn(&self, turn: u64) -> u64 {
        self.events
            .iter()
            .filter(|e| !e.is_system() && e.turn == turn)
            .map(|e| e.event)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Validate and assign `turn` per the append rule in §4.2; returns the
    /// turn number to use, or a `Conflict`.
    fn resolve_turn(&self, proposal: &AppendProposal) -> Result<u64> {
        let current = conclave_domain::current_turn(&self.events);
        let open = conclave_domain::has_open_turn(&self.events);
        match (open, proposal.turn) {
            (true, None) => {
                self.require_owner(current, &proposal.agent_id)?;
                Ok(current)
            }
            (true, Some(t)) if t == current => {
                self.require_owner(current, &proposal.agent_id)?;
                Ok(current)
            }
            (true, Some(_)) => Err(Error::Conflict("turn already open".to_string())),
            (false, None) => Ok(current + 1),
            (false, Some(t)) if t == current + 1 => Ok(current + 1),
            (false, Some(_)) => Err(Error::Conflict("invalid turn number".to_string())),
        }
    }

    fn require_owner(&self, current_turn: u64, agent_id: &str) -> Result<()> {
        let owner = conclave_domain::owner_agent_id(&self.events);
        match owner {
            Some(owner) if owner == agent_id => Ok(()),
            Some(_) => Err(Error::Conflict("turn owned by other".to_string())),
            None => {
                // hasOpenTurn was true so an owner must exist; this branch is
                // unreachable in practice but fails closed rather than panics.
                let _ = current_turn;
                Err(Error::Fatal("open turn has no owner".to_string()))
            }
        }
    }
}

/// Durable, ordered storage of the unified event stream. §4.1.
pub trait EventStore: Send + Sync {
    fn create_conversation(&self, metadata: ConversationMetadata) -> ConversationId;
    fn append(&self, conversation: ConversationId, proposal: AppendProposal) -> Result<AppendOutcome>;
    fn snapshot(&self, conversation: ConversationId) -> Result<Snapshot>;
    fn list_since(&self, conversation: ConversationId, since_seq: u64, limit: usize) -> Result<Vec<UnifiedEvent>>;
    fn clear_turn(&self, conversation: ConversationId, agent_id: &str) -> Result<ClearTurnOutcome>;
    fn put_attachment(&self, conversation: ConversationId, row: AttachmentRow) -> Result<()>;
    fn get_attachment(&self, conversation: ConversationId, doc_id: &str) -> Result<Option<AttachmentRow>>;
}

/// In-memory `EventStore`. One `parking_lot::Mutex` per conversation so
/// writers to different conversations never contend with each other; the
/// outer registry lock is only held long enough to look up or insert an
/// `Arc`.
pub struct InMemoryStore {
    conversations: Mutex<HashMap<ConversationId, Arc<Mutex<ConversationState>>>>,
    next_id: AtomicU64,
    dedup_capacity: usize,
}

impl InMemoryStore {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dedup_capacity,
        }
    }

    fn get(&self, conversation: ConversationId) -> Result<Arc<Mutex<ConversationState>>> {
        self.conversations
            .lock()
            .get(&conversation)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation}")))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventStore for InMemoryStore {
    fn create_conversation(&self, metadata: ConversationMetadata) -> ConversationId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = ConversationState::new(metadata, self.dedup_capacity);
        self.conversations.lock().insert(id, Arc::new(Mutex::new(state)));
        id
    }

    fn append(&self, conversation: ConversationId, proposal: AppendProposal) -> Result<AppendOutcome> {
        let slot = self.get(conversation)?;
        let mut state = slot.lock();

        if state.status == ConversationStatus::Completed {
            return Err(Error::InvalidArgument("conversation is completed".to_string()));
        }

        if let Some(client_request_id) = &proposal.client_request_id {
            let key = dedup_key(&proposal.agent_id, client_request_id);
            if let Some((seq, turn, event)) = state.dedup.get(&key) {
                if let Some(existing) = state.events.iter().find(|e| e.seq == seq) {
                    return Ok(AppendOutcome {
                        event: existing.clone(),
                        completion_notice: None,
                    });
                }
                // Cache entry outlived the event somehow; fall through and
                // re-append rather than return a dangling reference.
                let _ = (turn, event);
            }
        }

        let turn = state.resolve_turn(&proposal)?;
        let event_no = state.next_event_in_turn(turn);
        let seq = state.next_seq();
        let finality = proposal.finality;
        let closes_conversation = finality.map(|f| f.closes_conversation()).unwrap_or(false);
        let closes_turn_now = match &proposal.body {
            EventBody::Message(_) => finality.map(|f| f.closes_turn()).unwrap_or(false),
            EventBody::Trace(t) => t.closes_turn(),
            EventBody::System(_) => false,
        };

        let record = UnifiedEvent {
            conversation,
            turn,
            event: event_no,
            seq,
            ts: Utc::now(),
            agent_id: proposal.agent_id.clone(),
            finality,
            body: proposal.body,
        };
        state.events.push(record.clone());

        if closes_turn_now {
            state.last_closed_seq = seq;
        }

        if let Some(client_request_id) = &proposal.client_request_id {
            let key = dedup_key(&proposal.agent_id, client_request_id);
            state.dedup.insert(key, (seq, turn, event_no));
        }

        let completion_notice = if closes_conversation {
            state.status = ConversationStatus::Completed;
            let notice_seq = state.next_seq();
            let notice = UnifiedEvent {
                conversation,
                turn: 0,
                event: 1,
                seq: notice_seq,
                ts: Utc::now(),
                agent_id: "system".to_string(),
                finality: None,
                body: EventBody::System(SystemPayload::ConversationCompleted),
            };
            state.events.push(notice.clone());
            state.last_closed_seq = notice_seq.max(state.last_closed_seq);
            Some(notice)
        } else {
            None
        };

        Ok(AppendOutcome {
            event: record,
            completion_notice,
        })
    }

    fn snapshot(&self, conversation: ConversationId) -> Result<Snapshot> {
        let slot = self.get(conversation)?;
        let state = slot.lock();
        Ok(Snapshot {
            conversation,
            status: state.status,
            metadata: state.metadata.clone(),
            last_closed_seq: state.last_closed_seq,
            events: state.events.clone(),
        })
    }

    fn list_since(&self, conversation: ConversationId, since_seq: u64, limit: usize) -> Result<Vec<UnifiedEvent>> {
        let slot = self.get(conversation)?;
        let state = slot.lock();
        Ok(state
            .events
            .iter()
            .filter(|e| e.seq > since_seq)
            .take(limit)
            .cloned()
            .collect())
    }

    fn clear_turn(&self, conversation: ConversationId, agent_id: &str) -> Result<ClearTurnOutcome> {
        let slot = self.get(conversation)?;
        let mut state = slot.lock();

        let open = conclave_domain::has_open_turn(&state.events);
        let owner = conclave_domain::owner_agent_id(&state.events).cloned();
        let current = conclave_domain::current_turn(&state.events);

        if !open || owner.as_deref() != Some(agent_id) {
            return Ok(ClearTurnOutcome {
                turn: current + 1,
                appended: None,
            });
        }

        let event_no = state.next_event_in_turn(current);
        let seq = state.next_seq();
        let record = UnifiedEvent {
            conversation,
            turn: current,
            event: event_no,
            seq,
            ts: Utc::now(),
            agent_id: agent_id.to_string(),
            finality: None,
            body: EventBody::Trace(TracePayload::TurnCleared),
        };
        state.events.push(record.clone());
        state.last_closed_seq = seq;

        Ok(ClearTurnOutcome {
            turn: current + 1,
            appended: Some(record),
        })
    }

    fn put_attachment(&self, conversation: ConversationId, row: AttachmentRow) -> Result<()> {
        let slot = self.get(conversation)?;
        slot.lock().attachments.insert(row.doc_id.clone(), row);
        Ok(())
    }

    fn get_attachment(&self, conversation: ConversationId, doc_id: &str) -> Result<Option<AttachmentRow>> {
        let slot = self.get(conversation)?;
        let result = slot.lock().attachments.get(doc_id).cloned();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::Finality;

    fn store() -> InMemoryStore {
        InMemoryStore::new(256)
    }

    #[test]
    fn first_append_opens_turn_one() {
        let store = store();
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into(), "bob".into()]));
        let outcome = store
            .append(conv, AppendProposal::message("alice", "hi", Finality::None))
            .unwrap();
        assert_eq!(outcome.event.turn, 1);
        assert_eq!(outcome.event.event, 1);
        assert_eq!(outcome.event.seq, 1);
    }

    #[test]
    fn other_agent_cannot_join_open_turn() {
        let store = store();
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into(), "bob".into()]));
        store
            .append(conv, AppendProposal::message("alice", "one", Finality::None))
            .unwrap();
        let err = store
            .append(
                conv,
                AppendProposal::message("bob", "hijack", Finality::None).with_turn(1),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.snapshot(conv).unwrap().events.len(), 1);
    }

    #[test]
    fn skipping_a_turn_number_is_rejected() {
        let store = store();
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into()]));
        let err = store
            .append(conv, AppendProposal::message("alice", "hi", Finality::None).with_turn(3))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn finality_conversation_completes_and_appends_system_notice() {
        let store = store();
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into()]));
        let outcome = store
            .append(conv, AppendProposal::message("alice", "bye", Finality::Conversation))
            .unwrap();
        assert!(outcome.completion_notice.is_some());
        let snap = store.snapshot(conv).unwrap();
        assert_eq!(snap.status, ConversationStatus::Completed);

        let err = store
            .append(conv, AppendProposal::message("alice", "more", Finality::None))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn duplicate_client_request_id_is_deduplicated() {
        let store = store();
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into()]));
        let proposal = AppendProposal::message("alice", "hi", Finality::Turn).with_client_request_id("req-1");
        let first = store.append(conv, proposal.clone()).unwrap();
        let second = store.append(conv, proposal).unwrap();
        assert_eq!(first.event.seq, second.event.seq);
        assert_eq!(store.snapshot(conv).unwrap().events.len(), 1);
    }

    #[test]
    fn clear_turn_is_idempotent() {
        let store = store();
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into()]));
        store
            .append(conv, AppendProposal::message("alice", "hi", Finality::None))
            .unwrap();
        let first = store.clear_turn(conv, "alice").unwrap();
        assert!(first.appended.is_some());
        let second = store.clear_turn(conv, "alice").unwrap();
        assert!(second.appended.is_none());
        assert_eq!(first.turn, second.turn);
        assert_eq!(store.snapshot(conv).unwrap().events.len(), 2);
    }

    #[test]
    fn clear_turn_on_conversation_with_no_open_turn_is_a_no_op() {
        let store = store();
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into()]));
        let outcome = store.clear_turn(conv, "alice").unwrap();
        assert_eq!(outcome.turn, 1);
        assert!(outcome.appended.is_none());
    }

    #[test]
    fn list_since_returns_only_newer_events() {
        let store = store();
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into(), "bob".into()]));
        store
            .append(conv, AppendProposal::message("alice", "one", Finality::Turn))
            .unwrap();
        store
            .append(conv, AppendProposal::message("bob", "two", Finality::Turn))
            .unwrap();
        let since = store.list_since(conv, 1, 10).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].seq, 2);
    }

    #[test]
    fn unknown_conversation_is_not_found() {
        let store = store();
        let err = store.snapshot(999).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
