//! Wire protocol: JSON-RPC 2.0 envelope, typed method params/results, and the
//! wire-shape event/guidance payloads served over WebSocket notifications or
//! SSE.

pub mod jsonrpc;
pub mod methods;
pub mod wire;

pub use jsonrpc::{RpcError, RpcNotification, RpcOutcome, RpcRequest, RpcResponse};
pub use methods::{
    AppendResult as WireAppendResult, ClearTurnParams, ClearTurnResult, GetAttachmentParams, GetAttachmentResult,
    GetConversationParams, GetConversationResult, MessagePayloadWire, SendMessageParams, SendTraceParams,
    METHOD_CLEAR_TURN, METHOD_GET_ATTACHMENT, METHOD_GET_CONVERSATION, METHOD_SEND_MESSAGE, METHOD_SEND_TRACE,
};
pub use wire::{WireEvent, WireGuidance, WireStreamItem};

/// Method name for the server-initiated notification carrying a
/// [`wire::WireStreamItem`] — how the event/guidance stream rides over
/// JSON-RPC, which otherwise has no notion of subscriptions.
pub const NOTIFICATION_STREAM_ITEM: &str = "streamItem";

