//! In-process transport: direct calls into an `Orchestrator` living in the
//! same process. Used by embedders and by tests that don't need a real
//! socket.

use std::sync::Arc;

use async_trait::async_trait;
use conclave_domain::{ConversationId, Result, Snapshot};
use conclave_orchestrator::{
    BusItem, Orchestrator, PostMessageParams, PostTraceParams, SubscribeOptions, StreamItem as BusStreamItem,
};

use crate::transport::{self, AppendResult, EventStream, PostMessageArgs, PostTraceArgs, StreamItem, Transport};

pub struct InProcessTransport {
    orchestrator: Arc<Orchestrator>,
}

impl InProcessTransport {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

struct InProcessStream {
    inner: conclave_orchestrator::EventStream,
}

#[async_trait]
impl EventStream for InProcessStream {
    async fn recv(&mut self) -> Option<StreamItem> {
        loop {
            match self.inner.recv().await? {
                BusStreamItem::Item(BusItem::Event(e)) => return Some(StreamItem::Event(e)),
                BusStreamItem::Item(BusItem::Guidance(g)) => return Some(StreamItem::Guidance(g)),
                // A disconnected in-process stream has nothing useful to
                // retry with; the caller sees the stream end and must
                // resubscribe, per §4.3's SlowConsumer contract.
                BusStreamItem::SlowConsumer => return None,
            }
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn snapshot(&self, conversation: ConversationId, _include_scenario: bool) -> Result<Snapshot> {
        self.orchestrator.get_snapshot(conversation)
    }

    async fn post_message(&self, args: PostMessageArgs) -> Result<AppendResult> {
        let result = self.orchestrator.post_message(PostMessageParams {
            conversation: args.conversation,
            agent_id: args.agent_id,
            text: args.text,
            finality: args.finality,
            attachments: args.attachments,
            turn: args.turn,
            client_request_id: args.client_request_id,
        })?;
        Ok(AppendResult {
            seq: result.seq,
            turn: result.turn,
            event: result.event,
        })
    }

    async fn post_trace(&self, args: PostTraceArgs) -> Result<AppendResult> {
        let result = self.orchestrator.post_trace(PostTraceParams {
            conversation: args.conversation,
            agent_id: args.agent_id,
            payload: args.payload,
            turn: args.turn,
            client_request_id: args.client_request_id,
        })?;
        Ok(AppendResult {
            seq: result.seq,
            turn: result.turn,
            event: result.event,
        })
    }

    async fn clear_turn(&self, conversation: ConversationId, agent_id: &str) -> Result<u64> {
        self.orchestrator.clear_turn(conversation, agent_id)
    }

    async fn create_event_stream(
        &self,
        conversation: ConversationId,
        include_guidance: bool,
    ) -> Result<Box<dyn EventStream>> {
        let stream = self
            .orchestrator
            .create_event_stream(
                conversation,
                SubscribeOptions {
                    include_guidance,
                    since_seq: Some(0),
                    ..Default::default()
                },
            )
            .await?;
        Ok(Box::new(InProcessStream { inner: stream }))
    }

    fn now(&self) -> i64 {
        transport::now_millis()
    }
}
