// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! `GET /events`, `GET /agents/{id}/events` (spec.md §4.3/§4.6, C3).
//!
//! Text stream where each event is `event: <name>\n data: <json>\n\n`
//! (spec.md §6); live-tail only, matching the bus's "new subscriber does not
//! see history" contract (spec.md §9).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::Stream;

use crate::error::ApiError;
use crate::ControlContext;
use ctrlplane_core::AgentId;

fn to_sse(event: ctrlplane_core::Event) -> Result<SseEvent, Infallible> {
    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    Ok(SseEvent::default().event(event.event_type.name()).data(data))
}

pub async fn all_events(
    State(ctx): State<Arc<ControlContext>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let bus = ctx.bus.clone();
    let stream = async_stream::stream! {
        let mut sub = bus.subscribe();
        while let Some(event) = sub.recv(&bus).await {
            yield to_sse(event);
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

pub async fn agent_events(
    State(ctx): State<Arc<ControlContext>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let agent_id = AgentId::try_from(id)?;
    let bus = ctx.bus.clone();
    let stream = async_stream::stream! {
        let mut sub = bus.subscribe();
        while let Some(event) = sub.recv(&bus).await {
            if event.agent_id.as_ref() == Some(&agent_id) {
                yield to_sse(event);
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
