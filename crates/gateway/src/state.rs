use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conclave_domain::{AgentId, Config};
use conclave_orchestrator::{InMemoryStore, Orchestrator, OrchestratorConfig};
use sha2::{Digest, Sha256};

/// Shared application state handed to every axum handler. Cheap to clone:
/// everything inside is already `Arc`'d or `Copy`.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// SHA-256 digest of the configured bearer token. `None` means auth is
    /// disabled, which is only appropriate for local development.
    pub api_token_hash: Option<Arc<[u8]>>,
    pub started_at: DateTime<Utc>,
    pub connected_ws_clients: Arc<AtomicUsize>,
    pub conversations_created: Arc<AtomicU64>,
    pub events_appended: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let store = Arc::new(InMemoryStore::new(config.dedup_cache_size));
        let orchestrator_config = OrchestratorConfig {
            subscription_queue_capacity: config.subscription_queue_capacity,
            ..OrchestratorConfig::default()
        };
        Self {
            orchestrator: Arc::new(Orchestrator::new(store, orchestrator_config)),
            api_token_hash: config
                .api_token
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|t| Arc::from(Sha256::digest(t.as_bytes()).as_slice())),
            started_at: Utc::now(),
            connected_ws_clients: Arc::new(AtomicUsize::new(0)),
            conversations_created: Arc::new(AtomicU64::new(0)),
            events_appended: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_ws_connect(&self) {
        self.connected_ws_clients.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_ws_disconnect(&self) {
        self.connected_ws_clients.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn create_conversation(&self, agents: Vec<AgentId>) -> conclave_domain::ConversationId {
        self.conversations_created.fetch_add(1, Ordering::SeqCst);
        self.orchestrator.create_conversation(agents)
    }

    pub fn record_event_appended(&self) {
        self.events_appended.fetch_add(1, Ordering::SeqCst);
    }
}
