pub mod base_agent;
pub mod in_process;
pub mod transport;
pub mod ws_client;

pub use base_agent::{BaseAgent, RecoveryMode, TakeTurn, TurnContext};
pub use in_process::InProcessTransport;
pub use transport::{AppendResult, EventStream, PostMessageArgs, PostTraceArgs, StreamItem, Transport};
pub use ws_client::{ReconnectPolicy, WsClientConfig, WsTransport};
