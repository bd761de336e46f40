//! C4: the orchestrator service. The only component that writes to the log,
//! derives the next agent, and publishes guidance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conclave_domain::{
    AgentId, AppendProposal, AttachmentRow, ConversationId, ConversationMetadata, Error, EventBody,
    Finality, GuidanceEvent, Result, Snapshot, TracePayload,
};
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::bus::{Bus, EventStream, SubscribeOptions};
use crate::scheduler;
use crate::store::EventStore;

/// Result of a successful `post_message`/`post_trace`/`clear_turn` call.
#[derive(Debug, Clone, Copy)]
pub struct AppendResult {
    pub conversation: ConversationId,
    pub seq: u64,
    pub turn: u64,
    pub event: u64,
}

pub struct PostMessageParams {
    pub conversation: ConversationId,
    pub agent_id: AgentId,
    pub text: String,
    pub finality: Finality,
    pub attachments: Vec<conclave_domain::Attachment>,
    pub turn: Option<u64>,
    pub client_request_id: Option<String>,
}

pub struct PostTraceParams {
    pub conversation: ConversationId,
    pub agent_id: AgentId,
    pub payload: TracePayload,
    pub turn: Option<u64>,
    pub client_request_id: Option<String>,
}

pub struct OrchestratorConfig {
    pub guidance_deadline_ms: u64,
    pub subscription_queue_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            guidance_deadline_ms: 30_000,
            subscription_queue_capacity: 256,
        }
    }
}

/// Composes C1 (store), C3 (bus) and the scheduling policy into the public
/// surface consumed by transports (§6). Each conversation's writes are
/// serialized inside the store; this type adds guidance sequencing and bus
/// publication around those writes.
pub struct Orchestrator {
    store: Arc<dyn EventStore>,
    bus: Bus,
    config: OrchestratorConfig,
    guidance_seq: Mutex<HashMap<ConversationId, Arc<AtomicU64>>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn EventStore>, config: OrchestratorConfig) -> Self {
        Self {
            bus: Bus::new(config.subscription_queue_capacity),
            store,
            config,
            guidance_seq: Mutex::new(HashMap::new()),
        }
    }

    fn next_guidance_seq(&self, conversation: ConversationId) -> u64 {
        let counter = self
            .guidance_seq
            .lock()
            .entry(conversation)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn create_conversation(&self, agents: Vec<AgentId>) -> ConversationId {
        self.store.create_conversation(ConversationMetadata::new(agents))
    }

    /// Run the scheduling policy and publish guidance if it produces any.
    /// Called after any append that may have changed turn-openness, and on
    /// explicit start or reconnect-with-guidance.
    #[instrument(skip(self), fields(conversation))]
    fn schedule(&self, conversation: ConversationId) {
        let snapshot = match self.store.snapshot(conversation) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "scheduling failed to read snapshot");
                return;
            }
        };
        let seq = self.next_guidance_seq(conversation);
        if let Some(guidance) = scheduler::next_guidance(&snapshot, self.config.guidance_deadline_ms, seq) {
            info!(next_agent_id = %guidance.next_agent_id, kind = ?guidance.kind, turn = guidance.turn, "guidance emitted");
            self.bus.publish_guidance(guidance);
        }
    }

    /// Explicitly mark a conversation ready to run; emits the opening
    /// `start_turn` guidance for a conversation with no events yet. Safe to
    /// call again (idempotent at the guidance-emission level: it just
    /// re-derives from the current log state).
    pub fn start_conversation(&self, conversation: ConversationId) -> Result<()> {
        self.store.snapshot(conversation)?;
        self.schedule(conversation);
        Ok(())
    }

    #[instrument(skip(self, params), fields(conversation = params.conversation, agent_id = %params.agent_id))]
    pub fn post_message(&self, params: PostMessageParams) -> Result<AppendResult> {
        let proposal = AppendProposal {
            agent_id: params.agent_id,
            body: EventBody::Message(conclave_domain::MessagePayload {
                text: params.text,
                attachments: params.attachments,
                client_request_id: params.client_request_id.clone(),
            }),
            finality: Some(params.finality),
            turn: params.turn,
            client_request_id: params.client_request_id,
        };

        let outcome = self.retry_transient(|| self.store.append(params.conversation, proposal.clone()))?;
        self.bus.publish_event(outcome.event.clone());
        if let Some(notice) = &outcome.completion_notice {
            self.bus.publish_event(notice.clone());
        }

        if outcome.event.closes_turn() {
            self.schedule(params.conversation);
        }

        Ok(AppendResult {
            conversation: params.conversation,
            seq: outcome.event.seq,
            turn: outcome.event.turn,
            event: outcome.event.event,
        })
    }

    #[instrument(skip(self, params), fields(conversation = params.conversation, agent_id = %params.agent_id))]
    pub fn post_trace(&self, params: PostTraceParams) -> Result<AppendResult> {
        let closes_turn = params.payload.closes_turn();
        let proposal = AppendProposal {
            agent_id: params.agent_id,
            body: EventBody::Trace(params.payload),
            finality: None,
            turn: params.turn,
            client_request_id: params.client_request_id,
        };

        let outcome = self.retry_transient(|| self.store.append(params.conversation, proposal.clone()))?;
        self.bus.publish_event(outcome.event.clone());

        if closes_turn {
            self.schedule(params.conversation);
        }

        Ok(AppendResult {
            conversation: params.conversation,
            seq: outcome.event.seq,
            turn: outcome.event.turn,
            event: outcome.event.event,
        })
    }

    #[instrument(skip(self), fields(conversation, agent_id = %agent_id))]
    pub fn clear_turn(&self, conversation: ConversationId, agent_id: &str) -> Result<u64> {
        let outcome = self.store.clear_turn(conversation, agent_id)?;
        if let Some(event) = outcome.appended {
            self.bus.publish_event(event);
            self.schedule(conversation);
        }
        Ok(outcome.turn)
    }

    pub fn get_snapshot(&self, conversation: ConversationId) -> Result<Snapshot> {
        self.store.snapshot(conversation)
    }

    pub fn get_attachment(&self, conversation: ConversationId, doc_id: &str) -> Result<Option<AttachmentRow>> {
        self.store.get_attachment(conversation, doc_id)
    }

    pub fn put_attachment(&self, conversation: ConversationId, row: AttachmentRow) -> Result<()> {
        self.store.put_attachment(conversation, row)
    }

    /// §4.3: adapter over the bus. `include_guidance` subscribers implicitly
    /// request scheduling if the conversation is active with no open turn,
    /// matching case (c) of the scheduling triggers in §4.4.
    pub async fn create_event_stream(
        &self,
        conversation: ConversationId,
        options: SubscribeOptions,
    ) -> Result<EventStream> {
        let snapshot = self.store.snapshot(conversation)?;
        let want_guidance = options.include_guidance;
        let stream = self.bus.subscribe(self.store.clone(), conversation, options).await?;
        if want_guidance && snapshot.status == conclave_domain::ConversationStatus::Active {
            self.schedule(conversation);
        }
        Ok(stream)
    }

    /// Storage `Transient` errors are retried once before propagating (§4.4).
    fn retry_transient<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        match op() {
            Err(Error::Transient(msg)) => {
                warn!(error = %msg, "retrying after transient storage error");
                op()
            }
            other => other,
        }
    }
}
