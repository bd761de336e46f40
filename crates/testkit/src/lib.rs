//! Shared test harness: a scripted "echo" agent so integration tests across
//! crates can drive a full conversation without any LLM, plus a small
//! in-process conversation builder and a polling helper for assertions
//! against background tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conclave_agent::{BaseAgent, InProcessTransport, RecoveryMode, TakeTurn, TurnContext, Transport};
use conclave_domain::{AgentId, ConversationId, Finality};
use conclave_orchestrator::{InMemoryStore, Orchestrator, OrchestratorConfig};

/// A `takeTurn` implementation that replies with canned text in order,
/// closing its turn every time and closing the whole conversation on its
/// last scripted reply. Falls back to a filler reply if guided more times
/// than it has scripted lines for.
pub struct ScriptedAgent {
    replies: Vec<String>,
    next: AtomicUsize,
    pub turns_taken: Arc<AtomicUsize>,
}

impl ScriptedAgent {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
            turns_taken: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn turns_taken(&self) -> usize {
        self.turns_taken.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TakeTurn for ScriptedAgent {
    async fn take_turn(&self, ctx: TurnContext) -> conclave_domain::Result<()> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.turns_taken.fetch_add(1, Ordering::SeqCst);
        let text = self.replies.get(index).cloned().unwrap_or_else(|| "...".to_string());
        let finality = if index + 1 >= self.replies.len() { Finality::Conversation } else { Finality::Turn };
        ctx.post_message(text, finality).await?;
        Ok(())
    }
}

/// A fresh in-memory orchestrator plus a conversation among `agents`, ready
/// for `start_conversation` or a pre-seeded stale turn.
pub fn test_conversation(agents: Vec<AgentId>) -> (Arc<Orchestrator>, ConversationId) {
    let store = Arc::new(InMemoryStore::new(256));
    let orchestrator = Arc::new(Orchestrator::new(store, OrchestratorConfig::default()));
    let conversation = orchestrator.create_conversation(agents);
    (orchestrator, conversation)
}

/// Wire a [`ScriptedAgent`] up as a running [`BaseAgent`] over an in-process
/// transport to the given orchestrator. The caller owns the returned handle
/// and must keep it alive (and eventually call `stop()`) for the runtime's
/// background task to keep going.
pub fn spawn_scripted_agent(
    orchestrator: Arc<Orchestrator>,
    conversation: ConversationId,
    agent_id: AgentId,
    recovery_mode: RecoveryMode,
    agent: Arc<ScriptedAgent>,
) -> BaseAgent {
    let transport: Arc<dyn Transport> = Arc::new(InProcessTransport::new(orchestrator));
    BaseAgent::new(conversation, agent_id, transport, recovery_mode, agent)
}

/// Poll `check` until it returns `true` or `timeout` elapses, panicking on
/// timeout. For asserting on state a background task mutates asynchronously.
pub async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met before timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_agent_closes_the_conversation_on_its_last_line() {
        let (orchestrator, conversation) = test_conversation(vec!["alice".into()]);
        let agent = Arc::new(ScriptedAgent::new(["hello", "goodbye"]));
        let runtime = spawn_scripted_agent(orchestrator.clone(), conversation, "alice".into(), RecoveryMode::Resume, agent.clone());

        runtime.start().await.unwrap();
        orchestrator.start_conversation(conversation).unwrap();

        wait_until(|| agent.turns_taken() >= 2, Duration::from_secs(2)).await;

        let snapshot = orchestrator.get_snapshot(conversation).unwrap();
        assert_eq!(snapshot.status, conclave_domain::ConversationStatus::Completed);
        runtime.stop();
    }
}
