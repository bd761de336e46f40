//! The gateway shell (C7): axum HTTP/WebSocket server hosting the
//! orchestrator behind a JSON-RPC WebSocket endpoint, an SSE endpoint, a
//! small REST surface, bearer-token auth, and the CLI entry point.

pub mod api;
pub mod cli;
pub mod state;

pub use state::AppState;
