//! The JSON-RPC WebSocket endpoint (§6.1). One socket can issue requests
//! against any conversation; it also receives `streamItem` notifications for
//! every conversation it has touched via `getConversation` (or the
//! `conversationId` query parameter supplied at connect time), lazily
//! subscribing the first time each conversation is referenced.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use conclave_domain::ConversationId;
use conclave_orchestrator::{BusItem, PostMessageParams, PostTraceParams, StreamItem, SubscribeOptions};
use conclave_protocol::jsonrpc::{JsonRpcVersion, INVALID_PARAMS, METHOD_NOT_FOUND};
use conclave_protocol::{
    ClearTurnParams, ClearTurnResult, GetAttachmentParams, GetConversationParams, GetConversationResult,
    RpcError, RpcNotification, RpcRequest, RpcResponse, SendMessageParams, SendTraceParams, WireAppendResult,
    WireEvent, WireGuidance, WireStreamItem, METHOD_CLEAR_TURN, METHOD_GET_ATTACHMENT, METHOD_GET_CONVERSATION,
    METHOD_SEND_MESSAGE, METHOD_SEND_TRACE, NOTIFICATION_STREAM_ITEM,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::auth;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    pub token: Option<String>,
    pub conversation_id: Option<ConversationId>,
}

pub async fn gateway_ws(ws: WebSocketUpgrade, State(state): State<AppState>, Query(query): Query<WsQuery>) -> Response {
    if let Some(expected) = &state.api_token_hash {
        let provided = query.token.as_deref().unwrap_or("");
        if !auth::token_matches(expected, provided) {
            return (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.conversation_id))
}

type Subscriptions = Arc<Mutex<HashMap<ConversationId, JoinHandle<()>>>>;

async fn handle_socket(socket: WebSocket, state: AppState, initial_conversation: Option<ConversationId>) {
    state.record_ws_connect();
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(128);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let subscribed: Subscriptions = Arc::new(Mutex::new(HashMap::new()));
    if let Some(conversation) = initial_conversation {
        subscribe_conversation(&state, &subscribed, conversation, outbound_tx.clone());
    }

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_rpc_text(&state, &subscribed, &outbound_tx, &text).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    writer.abort();
    for (_, handle) in subscribed.lock().drain() {
        handle.abort();
    }
    state.record_ws_disconnect();
}

async fn handle_rpc_text(state: &AppState, subscribed: &Subscriptions, outbound: &mpsc::Sender<Message>, text: &str) {
    let request: RpcRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed json-rpc request, dropping frame");
            return;
        }
    };
    let response = dispatch(state, subscribed, outbound, request).await;
    if let Ok(json) = serde_json::to_string(&response) {
        let _ = outbound.send(Message::Text(json)).await;
    }
}

fn invalid_params(id: serde_json::Value, e: impl std::fmt::Display) -> RpcResponse {
    RpcResponse::err(id, RpcError { code: INVALID_PARAMS, message: e.to_string(), data: None })
}

async fn dispatch(state: &AppState, subscribed: &Subscriptions, outbound: &mpsc::Sender<Message>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.clone();
    let params = request.params;
    match method.as_str() {
        METHOD_GET_CONVERSATION => {
            let params: GetConversationParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid_params(id, e),
            };
            match state.orchestrator.get_snapshot(params.conversation_id) {
                Ok(snapshot) => {
                    subscribe_conversation(state, subscribed, params.conversation_id, outbound.clone());
                    let result = GetConversationResult::from(&snapshot);
                    RpcResponse::ok(id, serde_json::to_value(result).unwrap_or_default())
                }
                Err(e) => RpcResponse::err(id, (&e).into()),
            }
        }
        METHOD_SEND_MESSAGE => {
            let params: SendMessageParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid_params(id, e),
            };
            let result = state.orchestrator.post_message(PostMessageParams {
                conversation: params.conversation_id,
                agent_id: params.agent_id,
                text: params.message_payload.text,
                finality: params.finality,
                attachments: params.message_payload.attachments,
                turn: params.turn,
                client_request_id: params.message_payload.client_request_id,
            });
            match result {
                Ok(appended) => {
                    state.record_event_appended();
                    let wire = WireAppendResult {
                        conversation: appended.conversation,
                        seq: appended.seq,
                        turn: appended.turn,
                        event: appended.event,
                    };
                    RpcResponse::ok(id, serde_json::to_value(wire).unwrap_or_default())
                }
                Err(e) => RpcResponse::err(id, (&e).into()),
            }
        }
        METHOD_SEND_TRACE => {
            let params: SendTraceParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid_params(id, e),
            };
            let result = state.orchestrator.post_trace(PostTraceParams {
                conversation: params.conversation_id,
                agent_id: params.agent_id,
                payload: params.trace_payload,
                turn: params.turn,
                client_request_id: params.client_request_id,
            });
            match result {
                Ok(appended) => {
                    state.record_event_appended();
                    let wire = WireAppendResult {
                        conversation: appended.conversation,
                        seq: appended.seq,
                        turn: appended.turn,
                        event: appended.event,
                    };
                    RpcResponse::ok(id, serde_json::to_value(wire).unwrap_or_default())
                }
                Err(e) => RpcResponse::err(id, (&e).into()),
            }
        }
        METHOD_CLEAR_TURN => {
            let params: ClearTurnParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid_params(id, e),
            };
            match state.orchestrator.clear_turn(params.conversation_id, &params.agent_id) {
                Ok(turn) => RpcResponse::ok(id, serde_json::to_value(ClearTurnResult { turn }).unwrap_or_default()),
                Err(e) => RpcResponse::err(id, (&e).into()),
            }
        }
        METHOD_GET_ATTACHMENT => {
            let params: GetAttachmentParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid_params(id, e),
            };
            match state.orchestrator.get_attachment(params.conversation_id, &params.doc_id) {
                Ok(row) => RpcResponse::ok(id, serde_json::to_value(row).unwrap_or_default()),
                Err(e) => RpcResponse::err(id, (&e).into()),
            }
        }
        other => RpcResponse::err(
            id,
            RpcError { code: METHOD_NOT_FOUND, message: format!("unknown method: {other}"), data: None },
        ),
    }
}

/// Idempotent: a conversation already forwarding to this socket is left alone.
fn subscribe_conversation(state: &AppState, subscribed: &Subscriptions, conversation: ConversationId, outbound: mpsc::Sender<Message>) {
    let mut guard = subscribed.lock();
    if guard.contains_key(&conversation) {
        return;
    }
    let orchestrator = state.orchestrator.clone();
    let handle = tokio::spawn(async move {
        let options = SubscribeOptions { include_guidance: true, ..Default::default() };
        let mut event_stream = match orchestrator.create_event_stream(conversation, options).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, conversation, "failed to subscribe websocket client");
                return;
            }
        };
        loop {
            let item = match event_stream.recv().await {
                Some(StreamItem::Item(item)) => item,
                Some(StreamItem::SlowConsumer) | None => return,
            };
            let wire = match item {
                BusItem::Event(e) => WireStreamItem::Event(WireEvent::from(&e)),
                BusItem::Guidance(g) => WireStreamItem::Guidance(WireGuidance::from(&g)),
            };
            let notification = RpcNotification {
                jsonrpc: JsonRpcVersion,
                method: NOTIFICATION_STREAM_ITEM.to_string(),
                params: serde_json::to_value(wire).unwrap_or_default(),
            };
            let Ok(json) = serde_json::to_string(&notification) else { continue };
            if outbound.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
    });
    guard.insert(conversation, handle);
}
