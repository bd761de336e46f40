//! WebSocket JSON-RPC transport: the same [`Transport`] surface as
//! [`crate::in_process`], satisfied over a socket to a remote gateway.
//! Mirrors the node-sdk client's reconnect/heartbeat shape, inverted: here
//! we issue requests and listen for server-initiated notifications instead
//! of serving tool calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conclave_domain::{ConversationId, Error, GuidanceEvent, Result, Snapshot, UnifiedEvent};
use conclave_protocol::jsonrpc::{JsonRpcVersion, CONFLICT, INVALID_PARAMS, NOT_FOUND, SLOW_CONSUMER};
use conclave_protocol::{
    ClearTurnParams, ClearTurnResult, GetAttachmentParams, GetAttachmentResult, GetConversationParams,
    GetConversationResult, MessagePayloadWire, RpcError, RpcNotification, RpcOutcome, RpcRequest, RpcResponse,
    SendMessageParams, SendTraceParams, WireAppendResult, WireStreamItem, METHOD_CLEAR_TURN, METHOD_GET_ATTACHMENT,
    METHOD_GET_CONVERSATION, METHOD_SEND_MESSAGE, METHOD_SEND_TRACE, NOTIFICATION_STREAM_ITEM,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::{self, AppendResult, EventStream, PostMessageArgs, PostTraceArgs, StreamItem, Transport};

/// Jittered exponential back-off between reconnect attempts, and the
/// attempt ceiling `drive` gives up at.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// `0` means `drive` never gives up on its own; the caller's
    /// [`CancellationToken`] is still honored either way.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        // Spread reconnect storms across a gateway restart: ~25% jitter,
        // deterministic in the attempt number so retries stay reproducible.
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761);
    (hash as f64) / (u32::MAX as f64)
}

#[derive(Debug, Clone)]
pub struct WsClientConfig {
    pub url: String,
    pub token: Option<String>,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub request_timeout: Duration,
    pub notification_buffer: usize,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8088/v1/conversations/ws".into(),
            token: None,
            heartbeat_interval: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(10),
            notification_buffer: 1024,
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcOutcome>>>>;

struct Inner {
    config: WsClientConfig,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    notifications: broadcast::Sender<WireStreamItem>,
}

/// A live connection to a gateway, reconnecting on drop per
/// `config.reconnect`. In-flight requests fail with
/// [`Error::Transient`] when the connection drops out from under them.
pub struct WsTransport {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    pub fn connect(config: WsClientConfig) -> Self {
        let (notifications, _rx) = broadcast::channel(config.notification_buffer);
        let inner = Arc::new(Inner {
            config,
            outbound: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            notifications,
        });
        let cancel = CancellationToken::new();

        let driver_inner = inner.clone();
        let driver_cancel = cancel.clone();
        let driver = tokio::spawn(async move { Self::drive(driver_inner, driver_cancel).await });

        Self { inner, cancel, driver: Mutex::new(Some(driver)) }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.driver.lock().take() {
            handle.abort();
        }
    }

    /// Reconnect loop: connect, serve until the socket drops, fail pending
    /// requests, back off, repeat. Returns only when cancelled or the
    /// backoff policy gives up.
    async fn drive(inner: Arc<Inner>, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match Self::connect_and_serve(&inner, &cancel).await {
                Ok(()) => attempt = 0,
                Err(e) => warn!(error = %e, attempt, "gateway connection lost"),
            }

            for (_, tx) in inner.pending.lock().drain() {
                let _ = tx.send(RpcOutcome::Err {
                    error: RpcError { code: SLOW_CONSUMER, message: "connection lost".into(), data: None },
                });
            }

            if inner.config.reconnect.should_give_up(attempt) {
                error!(attempts = attempt, "max reconnect attempts exhausted");
                return;
            }
            let delay = inner.config.reconnect.delay_for_attempt(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return,
            }
            attempt += 1;
        }
    }

    async fn connect_and_serve(inner: &Arc<Inner>, cancel: &CancellationToken) -> anyhow::Result<()> {
        let url = build_url(&inner.config);
        info!(url = %url, "connecting to gateway");
        let (ws, _response) = tokio_tungstenite::connect_async(&url).await?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
        *inner.outbound.lock() = Some(outbound_tx.clone());

        let heartbeat = inner.config.heartbeat_interval;
        let ping_tx = outbound_tx.clone();
        let ping_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat);
            loop {
                interval.tick().await;
                if ping_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        });

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = stream.next() => match next {
                    Some(Ok(Message::Text(text))) => handle_incoming(inner, &text),
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                },
            }
        };

        *inner.outbound.lock() = None;
        ping_task.abort();
        writer_task.abort();
        result
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        let request = RpcRequest { jsonrpc: JsonRpcVersion, id: serde_json::json!(id), method: method.to_string(), params };
        let sender = self.inner.outbound.lock().clone();
        let sender = sender.ok_or_else(|| Error::Transient("not connected".into()))?;
        let json = serde_json::to_string(&request).map_err(Error::Json)?;
        sender
            .send(Message::Text(json))
            .await
            .map_err(|_| Error::Transient("connection closed before send".into()))?;

        let outcome = match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(Error::Transient("connection closed before response".into())),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                return Err(Error::Transient("request timed out".into()));
            }
        };

        match outcome {
            RpcOutcome::Ok { result } => Ok(result),
            RpcOutcome::Err { error } => Err(rpc_error_to_domain(error)),
        }
    }
}

fn handle_incoming(inner: &Arc<Inner>, text: &str) {
    if let Ok(response) = serde_json::from_str::<RpcResponse>(text) {
        if let Some(id) = response.id.as_u64() {
            if let Some(tx) = inner.pending.lock().remove(&id) {
                let _ = tx.send(response.outcome);
                return;
            }
        }
        debug!("response for unknown or already-resolved request id");
        return;
    }
    if let Ok(notification) = serde_json::from_str::<RpcNotification>(text) {
        if notification.method == NOTIFICATION_STREAM_ITEM {
            match serde_json::from_value::<WireStreamItem>(notification.params) {
                Ok(item) => {
                    let _ = inner.notifications.send(item);
                }
                Err(e) => warn!(error = %e, "malformed streamItem notification"),
            }
        }
        return;
    }
    debug!(text, "unrecognized inbound frame");
}

fn rpc_error_to_domain(e: RpcError) -> Error {
    match e.code {
        CONFLICT => Error::Conflict(e.message),
        NOT_FOUND => Error::NotFound(e.message),
        INVALID_PARAMS => Error::InvalidArgument(e.message),
        SLOW_CONSUMER => Error::SlowConsumer,
        _ => Error::Transient(e.message),
    }
}

fn build_url(config: &WsClientConfig) -> String {
    match &config.token {
        Some(token) => {
            let sep = if config.url.contains('?') { "&" } else { "?" };
            format!("{}{sep}token={token}", config.url)
        }
        None => config.url.clone(),
    }
}

struct WsEventStream {
    conversation: ConversationId,
    rx: broadcast::Receiver<WireStreamItem>,
}

#[async_trait]
impl EventStream for WsEventStream {
    async fn recv(&mut self) -> Option<StreamItem> {
        loop {
            match self.rx.recv().await {
                Ok(WireStreamItem::Event(wire)) => {
                    if wire.conversation != self.conversation {
                        continue;
                    }
                    match UnifiedEvent::try_from(&wire) {
                        Ok(event) => return Some(StreamItem::Event(event)),
                        Err(e) => {
                            warn!(error = %e, "dropping malformed event notification");
                            continue;
                        }
                    }
                }
                Ok(WireStreamItem::Guidance(wire)) => {
                    if wire.conversation != self.conversation {
                        continue;
                    }
                    return Some(StreamItem::Guidance(GuidanceEvent::from(&wire)));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => return None,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn snapshot(&self, conversation: ConversationId, include_scenario: bool) -> Result<Snapshot> {
        let params = serde_json::to_value(GetConversationParams { conversation_id: conversation, include_scenario })
            .map_err(Error::Json)?;
        let value = self.call(METHOD_GET_CONVERSATION, params).await?;
        let result: GetConversationResult = serde_json::from_value(value).map_err(Error::Json)?;
        Snapshot::try_from(&result)
    }

    async fn post_message(&self, args: PostMessageArgs) -> Result<AppendResult> {
        let params = serde_json::to_value(SendMessageParams {
            conversation_id: args.conversation,
            agent_id: args.agent_id,
            message_payload: MessagePayloadWire {
                text: args.text,
                attachments: args.attachments,
                client_request_id: args.client_request_id,
            },
            finality: args.finality,
            turn: args.turn,
        })
        .map_err(Error::Json)?;
        let value = self.call(METHOD_SEND_MESSAGE, params).await?;
        let result: WireAppendResult = serde_json::from_value(value).map_err(Error::Json)?;
        Ok(AppendResult { seq: result.seq, turn: result.turn, event: result.event })
    }

    async fn post_trace(&self, args: PostTraceArgs) -> Result<AppendResult> {
        let params = serde_json::to_value(SendTraceParams {
            conversation_id: args.conversation,
            agent_id: args.agent_id,
            trace_payload: args.payload,
            turn: args.turn,
            client_request_id: args.client_request_id,
        })
        .map_err(Error::Json)?;
        let value = self.call(METHOD_SEND_TRACE, params).await?;
        let result: WireAppendResult = serde_json::from_value(value).map_err(Error::Json)?;
        Ok(AppendResult { seq: result.seq, turn: result.turn, event: result.event })
    }

    async fn clear_turn(&self, conversation: ConversationId, agent_id: &str) -> Result<u64> {
        let params = serde_json::to_value(ClearTurnParams { conversation_id: conversation, agent_id: agent_id.to_string() })
            .map_err(Error::Json)?;
        let value = self.call(METHOD_CLEAR_TURN, params).await?;
        let result: ClearTurnResult = serde_json::from_value(value).map_err(Error::Json)?;
        Ok(result.turn)
    }

    async fn create_event_stream(
        &self,
        conversation: ConversationId,
        _include_guidance: bool,
    ) -> Result<Box<dyn EventStream>> {
        Ok(Box::new(WsEventStream { conversation, rx: self.inner.notifications.subscribe() }))
    }

    fn now(&self) -> i64 {
        transport::now_millis()
    }
}

#[allow(dead_code)]
async fn get_attachment(transport: &WsTransport, conversation: ConversationId, doc_id: &str) -> Result<GetAttachmentResult> {
    let params = serde_json::to_value(GetAttachmentParams { conversation_id: conversation, doc_id: doc_id.to_string() })
        .map_err(Error::Json)?;
    let value = transport.call(METHOD_GET_ATTACHMENT, params).await?;
    serde_json::from_value(value).map_err(Error::Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_appends_token() {
        let config = WsClientConfig { url: "ws://localhost:8088/ws".into(), token: Some("secret".into()), ..Default::default() };
        assert_eq!(build_url(&config), "ws://localhost:8088/ws?token=secret");
    }

    #[test]
    fn build_url_without_token_is_unchanged() {
        let config = WsClientConfig { url: "ws://localhost:8088/ws".into(), token: None, ..Default::default() };
        assert_eq!(build_url(&config), "ws://localhost:8088/ws");
    }

    #[test]
    fn reconnect_delay_grows_with_attempt_and_caps_out() {
        let p = ReconnectPolicy { initial_delay: Duration::from_secs(10), max_delay: Duration::from_secs(30), backoff_factor: 10.0, max_attempts: 0 };
        assert!(p.delay_for_attempt(1) > p.delay_for_attempt(0));
        assert!(p.delay_for_attempt(10) <= Duration::from_millis(37_500));
    }

    #[test]
    fn reconnect_gives_up_once_limited() {
        let p = ReconnectPolicy { max_attempts: 3, ..Default::default() };
        assert!(!p.should_give_up(2));
        assert!(p.should_give_up(3));
        assert!(!ReconnectPolicy::default().should_give_up(1_000_000));
    }

    #[test]
    fn rpc_error_codes_map_to_domain_errors() {
        assert!(matches!(
            rpc_error_to_domain(RpcError { code: CONFLICT, message: "x".into(), data: None }),
            Error::Conflict(_)
        ));
        assert!(matches!(
            rpc_error_to_domain(RpcError { code: SLOW_CONSUMER, message: "x".into(), data: None }),
            Error::SlowConsumer
        ));
    }
}
