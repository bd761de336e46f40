//! C6: the transport adapter. A uniform surface the agent runtime consumes
//! over either an in-process orchestrator or a JSON-RPC WebSocket.

use async_trait::async_trait;
use conclave_domain::{AgentId, Attachment, ConversationId, Finality, GuidanceEvent, Result, Snapshot, TracePayload, UnifiedEvent};

#[derive(Debug, Clone)]
pub struct PostMessageArgs {
    pub conversation: ConversationId,
    pub agent_id: AgentId,
    pub text: String,
    pub finality: Finality,
    pub attachments: Vec<Attachment>,
    pub turn: Option<u64>,
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PostTraceArgs {
    pub conversation: ConversationId,
    pub agent_id: AgentId,
    pub payload: TracePayload,
    pub turn: Option<u64>,
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct AppendResult {
    pub seq: u64,
    pub turn: u64,
    pub event: u64,
}

/// What an `EventStream` yields: a persisted unified event or a transient
/// guidance directive, interleaved in `seq` order for unified events.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(UnifiedEvent),
    Guidance(GuidanceEvent),
}

#[async_trait]
pub trait EventStream: Send {
    async fn recv(&mut self) -> Option<StreamItem>;
}

/// The uniform surface §4.6 specifies, satisfied identically by the
/// in-process adapter and the WebSocket client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn snapshot(&self, conversation: ConversationId, include_scenario: bool) -> Result<Snapshot>;
    async fn post_message(&self, args: PostMessageArgs) -> Result<AppendResult>;
    async fn post_trace(&self, args: PostTraceArgs) -> Result<AppendResult>;
    async fn clear_turn(&self, conversation: ConversationId, agent_id: &str) -> Result<u64>;
    async fn create_event_stream(
        &self,
        conversation: ConversationId,
        include_guidance: bool,
    ) -> Result<Box<dyn EventStream>>;
    fn now(&self) -> i64;
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
