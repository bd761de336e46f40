//! `GET /conversations/:id/events` — the SSE half of §6.1's "identical
//! payload shapes" promise: every frame here is the same `WireEvent`/
//! `WireGuidance` JSON the WebSocket notification carries, just framed as
//! an SSE `event:`/`data:` pair instead of a JSON-RPC notification.

use std::collections::HashSet;
use std::convert::Infallible;

use async_stream::stream;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use conclave_domain::ConversationId;
use conclave_orchestrator::{BusItem, StreamItem, SubscribeOptions};
use conclave_protocol::{WireEvent, WireGuidance};
use futures_util::Stream;
use serde::Deserialize;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    pub events: Option<String>,
    pub agents: Option<String>,
    pub since: Option<u64>,
}

fn split_csv(value: &Option<String>) -> Option<HashSet<String>> {
    value.as_ref().map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
}

pub async fn conversation_events(
    State(state): State<AppState>,
    Path(conversation): Path<ConversationId>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let options = SubscribeOptions {
        events: split_csv(&query.events),
        agents: split_csv(&query.agents),
        include_guidance: true,
        since_seq: query.since,
    };
    let mut event_stream = state.orchestrator.create_event_stream(conversation, options).await?;

    let body = stream! {
        loop {
            match event_stream.recv().await {
                Some(StreamItem::Item(BusItem::Event(event))) => {
                    let wire = WireEvent::from(&event);
                    let data = serde_json::to_string(&wire).unwrap_or_default();
                    yield Ok(Event::default().event(wire.type_name.clone()).data(data));
                }
                Some(StreamItem::Item(BusItem::Guidance(guidance))) => {
                    let wire = WireGuidance::from(&guidance);
                    let data = serde_json::to_string(&wire).unwrap_or_default();
                    yield Ok(Event::default().event("guidance").data(data));
                }
                Some(StreamItem::SlowConsumer) | None => break,
            }
        }
    };

    Ok(Sse::new(body).keep_alive(KeepAlive::default()))
}
