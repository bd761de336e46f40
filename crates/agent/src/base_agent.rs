//! C5: the agent runtime. Cooperative single-tasking: at most one `takeTurn`
//! in flight per runtime instance, driven entirely by orchestrator guidance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conclave_domain::{AgentId, ConversationId, Finality, Snapshot};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::transport::{StreamItem, Transport};

/// `resume`: rejoin an in-flight turn as-is. `restart`: on `continue_turn`,
/// clear the stale turn before producing anything new. Only affects
/// `continue_turn`; `start_turn` never clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    Resume,
    Restart,
}

/// Passed to the domain `takeTurn` callback for the duration of one turn.
pub struct TurnContext {
    pub conversation: ConversationId,
    pub agent_id: AgentId,
    pub guidance_seq: u64,
    pub deadline_ms: u64,
    pub current_turn_number: u64,
    pub snapshot: Snapshot,
    pub transport: Arc<dyn Transport>,
}

impl TurnContext {
    /// Best-effort refresh; callers that need the very latest state mid-turn
    /// call this instead of trusting the cloned `snapshot`.
    pub async fn latest_snapshot(&self) -> conclave_domain::Result<Snapshot> {
        self.transport.snapshot(self.conversation, false).await
    }

    pub async fn post_message(
        &self,
        text: impl Into<String>,
        finality: Finality,
    ) -> conclave_domain::Result<crate::transport::AppendResult> {
        // Not `Some(self.current_turn_number)`: that number is the turn
        // guidance was issued for, but a `Restart`-mode `clearTurn` run
        // before this callback closes that very turn. The store resolves
        // `None` correctly either way — it joins the caller's open turn, or
        // opens the next one after a clear — so let it decide.
        self.transport
            .post_message(crate::transport::PostMessageArgs {
                conversation: self.conversation,
                agent_id: self.agent_id.clone(),
                text: text.into(),
                finality,
                attachments: vec![],
                turn: None,
                client_request_id: None,
            })
            .await
    }
}

/// The domain-specific callback a `BaseAgent` invokes once per turn. Errors
/// are logged by the runtime and do not close the turn (§7): the next
/// guidance only arrives after the turn is cleared by someone.
#[async_trait]
pub trait TakeTurn: Send + Sync {
    async fn take_turn(&self, ctx: TurnContext) -> conclave_domain::Result<()>;
}

struct Mirror {
    status: conclave_domain::ConversationStatus,
    last_closed_seq: u64,
}

/// Guidance-driven executor for one `(conversation, agentId)` pair.
pub struct BaseAgent {
    conversation: ConversationId,
    agent_id: AgentId,
    transport: Arc<dyn Transport>,
    recovery_mode: RecoveryMode,
    take_turn: Arc<dyn TakeTurn>,
    in_turn: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BaseAgent {
    pub fn new(
        conversation: ConversationId,
        agent_id: AgentId,
        transport: Arc<dyn Transport>,
        recovery_mode: RecoveryMode,
        take_turn: Arc<dyn TakeTurn>,
    ) -> Self {
        Self {
            conversation,
            agent_id,
            transport,
            recovery_mode,
            take_turn,
            in_turn: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Acquire a live guidance-inclusive stream, mirror the initial snapshot,
    /// and dispatch turns as guidance arrives.
    pub async fn start(&self) -> conclave_domain::Result<()> {
        let snapshot = self.transport.snapshot(self.conversation, false).await?;
        let mirror = Arc::new(Mutex::new(Mirror {
            status: snapshot.status,
            last_closed_seq: snapshot.last_closed_seq,
        }));

        let mut stream = self.transport.create_event_stream(self.conversation, true).await?;

        let conversation = self.conversation;
        let agent_id = self.agent_id.clone();
        let transport = self.transport.clone();
        let recovery_mode = self.recovery_mode;
        let take_turn = self.take_turn.clone();
        let in_turn = self.in_turn.clone();
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.recv() => item,
                };
                let Some(item) = item else { break };

                match item {
                    StreamItem::Event(event) => {
                        let mut m = mirror.lock();
                        m.status = if event.closes_turn() && matches!(event.finality, Some(Finality::Conversation)) {
                            conclave_domain::ConversationStatus::Completed
                        } else {
                            m.status
                        };
                        if event.closes_turn() {
                            m.last_closed_seq = event.seq;
                        }
                        let completed = m.status == conclave_domain::ConversationStatus::Completed;
                        drop(m);
                        if completed {
                            info!(conversation, agent_id = %agent_id, "conversation completed, stopping runtime");
                            break;
                        }
                    }
                    StreamItem::Guidance(guidance) => {
                        if guidance.next_agent_id != agent_id {
                            continue;
                        }
                        if in_turn.swap(true, Ordering::SeqCst) {
                            warn!(conversation, agent_id = %agent_id, "guidance dropped, turn already in progress");
                            continue;
                        }

                        let transport = transport.clone();
                        let agent_id = agent_id.clone();
                        let take_turn = take_turn.clone();
                        let in_turn = in_turn.clone();

                        tokio::spawn(async move {
                            if guidance.kind == conclave_domain::GuidanceKind::ContinueTurn
                                && recovery_mode == RecoveryMode::Restart
                            {
                                if let Err(e) = transport.clear_turn(conversation, &agent_id).await {
                                    error!(error = %e, "clearTurn before restart failed");
                                }
                            }

                            let snapshot = match transport.snapshot(conversation, false).await {
                                Ok(s) => s,
                                Err(e) => {
                                    error!(error = %e, "snapshot refresh before turn failed");
                                    in_turn.store(false, Ordering::SeqCst);
                                    return;
                                }
                            };

                            let ctx = TurnContext {
                                conversation,
                                agent_id: agent_id.clone(),
                                guidance_seq: guidance.seq,
                                deadline_ms: guidance.deadline_ms,
                                current_turn_number: guidance.turn,
                                snapshot,
                                transport,
                            };

                            if let Err(e) = take_turn.take_turn(ctx).await {
                                error!(conversation, agent_id = %agent_id, error = %e, "takeTurn failed");
                            }

                            in_turn.store(false, Ordering::SeqCst);
                        });
                    }
                }
            }
        });

        *self.handle.lock() = Some(task);
        Ok(())
    }

    /// Idempotent: tears down the subscription and discards the mirror.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
