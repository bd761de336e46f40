use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// Liveness probe. Always `200` once the process is accepting connections;
/// does not touch the orchestrator, so it stays cheap under load.
pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0);
    Json(serde_json::json!({
        "uptimeSecs": uptime_secs,
        "conversationsCreated": state.conversations_created.load(Ordering::SeqCst),
        "eventsAppended": state.events_appended.load(Ordering::SeqCst),
        "connectedWsClients": state.connected_ws_clients.load(Ordering::SeqCst),
    }))
}
