//! C3: the subscription bus. One broadcast channel per conversation carries
//! live unified events and guidance; each subscription backfills from the
//! store before attaching, then forwards from the broadcast channel with a
//! high-water mark so the backfill/live seam has no gap and no duplicate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use conclave_domain::{AgentId, ConversationId, GuidanceEvent, UnifiedEvent};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::store::EventStore;

/// Either half of what a subscriber observes.
#[derive(Debug, Clone)]
pub enum BusItem {
    Event(UnifiedEvent),
    Guidance(GuidanceEvent),
}

impl BusItem {
    fn seq(&self) -> Option<u64> {
        match self {
            BusItem::Event(e) => Some(e.seq),
            BusItem::Guidance(_) => None,
        }
    }
}

/// What a subscription's channel yields: a delivered item, or a terminal
/// slow-consumer disconnection.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Item(BusItem),
    SlowConsumer,
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub events: Option<HashSet<String>>,
    pub agents: Option<HashSet<AgentId>>,
    pub include_guidance: bool,
    pub since_seq: Option<u64>,
}

impl SubscribeOptions {
    fn accepts(&self, item: &BusItem) -> bool {
        match item {
            BusItem::Event(e) => {
                if let Some(types) = &self.events {
                    if !types.contains(e.type_name()) {
                        return false;
                    }
                }
                if let Some(agents) = &self.agents {
                    if !e.is_system() && !agents.contains(&e.agent_id) {
                        return false;
                    }
                }
                true
            }
            BusItem::Guidance(_) => self.include_guidance,
        }
    }
}

pub struct EventStream {
    rx: mpsc::Receiver<StreamItem>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }
}

/// Per-conversation broadcast senders, keyed by conversation. Created
/// lazily on first publish or subscribe.
pub struct Bus {
    channels: Mutex<HashMap<ConversationId, broadcast::Sender<BusItem>>>,
    capacity: usize,
    forward_buffer: usize,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            forward_buffer: capacity.max(1),
        }
    }

    fn channel(&self, conversation: ConversationId) -> broadcast::Sender<BusItem> {
        self.channels
            .lock()
            .entry(conversation)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a unified event to every live subscriber. No-op if nobody is
    /// subscribed (the send error from zero receivers is expected and ignored).
    pub fn publish_event(&self, event: UnifiedEvent) {
        let _ = self.channel(event.conversation).send(BusItem::Event(event));
    }

    /// Publish guidance. Fire-and-forget, matching the "guidance is dropped
    /// for disconnected subscribers" contract in §4.3.
    pub fn publish_guidance(&self, guidance: GuidanceEvent) {
        let _ = self.channel(guidance.conversation).send(BusItem::Guidance(guidance));
    }

    /// Backfill from the store, then attach to live delivery with no gap and
    /// no duplication at the seam (§9 "high-water mark" handshake).
    pub async fn subscribe(
        &self,
        store: Arc<dyn EventStore>,
        conversation: ConversationId,
        options: SubscribeOptions,
    ) -> conclave_domain::Result<EventStream> {
        // Subscribe to the live channel before reading backfill: a broadcast
        // receiver only sees values sent after it subscribes, so doing this
        // the other way round would lose anything published in between. The
        // high-water mark below dedups the resulting overlap instead.
        let mut live_rx = self.channel(conversation).subscribe();

        let since = options.since_seq.unwrap_or(0);
        let backfill = store.list_since(conversation, since, usize::MAX)?;
        let high_water_mark = backfill.last().map(|e| e.seq).unwrap_or(since);

        let (tx, rx) = mpsc::channel(self.forward_buffer);

        tokio::spawn(async move {
            for event in backfill {
                if options.accepts(&BusItem::Event(event.clone())) && tx.send(StreamItem::Item(BusItem::Event(event))).await.is_err() {
                    return;
                }
            }

            loop {
                match live_rx.recv().await {
                    Ok(item) => {
                        if let Some(seq) = item.seq() {
                            if seq <= high_water_mark {
                                continue;
                            }
                        }
                        if !options.accepts(&item) {
                            continue;
                        }
                        if tx.send(StreamItem::Item(item)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let _ = tx.send(StreamItem::SlowConsumer).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(EventStream { rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use conclave_domain::{AppendProposal, ConversationMetadata, Finality};

    #[tokio::test]
    async fn backfill_then_live_has_no_gap_and_no_duplicate() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryStore::new(256));
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into(), "bob".into()]));
        store
            .append(conv, AppendProposal::message("alice", "one", Finality::Turn))
            .unwrap();

        let bus = Bus::new(64);
        let mut stream = bus
            .subscribe(store.clone(), conv, SubscribeOptions { since_seq: Some(0), ..Default::default() })
            .await
            .unwrap();

        let outcome = store
            .append(conv, AppendProposal::message("bob", "two", Finality::Turn).with_turn(2))
            .unwrap();
        bus.publish_event(outcome.event.clone());

        let first = stream.recv().await.unwrap();
        match first {
            StreamItem::Item(BusItem::Event(e)) => assert_eq!(e.seq, 1),
            other => panic!("unexpected {other:?}"),
        }
        let second = stream.recv().await.unwrap();
        match second {
            StreamItem::Item(BusItem::Event(e)) => assert_eq!(e.seq, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_type_filter_excludes_other_types() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryStore::new(256));
        let conv = store.create_conversation(ConversationMetadata::new(vec!["alice".into()]));
        store
            .append(conv, AppendProposal::message("alice", "hi", Finality::None))
            .unwrap();

        let bus = Bus::new(64);
        let mut only_traces = HashSet::new();
        only_traces.insert("trace".to_string());
        let mut stream = bus
            .subscribe(
                store.clone(),
                conv,
                SubscribeOptions {
                    events: Some(only_traces),
                    since_seq: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = store.clear_turn(conv, "alice").unwrap();
        bus.publish_event(outcome.appended.clone().unwrap());

        let item = stream.recv().await.unwrap();
        match item {
            StreamItem::Item(BusItem::Event(e)) => assert_eq!(e.type_name(), "trace"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
