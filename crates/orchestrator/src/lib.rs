//! The conversation orchestrator: event log (C1), turn state machine (C2,
//! largely lives in `conclave_domain::conversation`), subscription bus (C3),
//! and the orchestrator service that composes them (C4).

pub mod bus;
pub mod orchestrator;
pub mod scheduler;
pub mod store;

pub use bus::{Bus, BusItem, EventStream, StreamItem, SubscribeOptions};
pub use orchestrator::{AppendResult, Orchestrator, OrchestratorConfig, PostMessageParams, PostTraceParams};
pub use store::{AppendOutcome, ClearTurnOutcome, EventStore, InMemoryStore};
