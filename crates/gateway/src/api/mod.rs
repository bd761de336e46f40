pub mod auth;
pub mod error;
pub mod health;
pub mod rest;
pub mod sse;
pub mod ws;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Builds the full router. Split out of `main` so `serve` is the only thing
/// that needs a bound listener.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/conversations", post(rest::create_conversation))
        .route("/conversations/:id/start", post(rest::start_conversation))
        .route("/conversations/:id", get(rest::get_conversation))
        .route("/conversations/:id/events", get(sse::conversation_events))
        .route("/metrics", get(health::metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer_token));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/ws", get(ws::gateway_ws))
        .merge(protected)
        .with_state(state)
}
