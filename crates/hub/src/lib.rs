// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Connection Hub (spec.md §4.4, C4): owns every live WebSocket bridge
//! connection, performs the register handshake, tracks heartbeats, and
//! relays frames between the wire and the rest of the control plane.
//!
//! The hub and the dispatch router (C5) call into each other, but the crate
//! graph only allows the hub to sit below the router. `ctrlplane_core::ports`
//! breaks that cycle: the hub implements `OutboundTransport` and accepts a
//! `ResponseSink` injected after construction, once the composition root in
//! `ctrlplane-server` has built both sides.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod connection;
pub mod frame;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use ctrlplane_auth::{AuditSink, Validator};
use ctrlplane_bus::EventBus;
use ctrlplane_core::{AgentId, AgentRegistry, ControlError, MessageKind, OutboundEnvelope, OutboundTransport, ResponseSink};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use frame::OutboundFrame;

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub write_timeout: Duration,
    /// Outbound mpsc channel depth per connection.
    pub outbound_queue_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
            outbound_queue_size: 64,
        }
    }
}

/// A `ResponseSink` that drops everything with a warning. Used only until
/// the composition root calls `ConnectionHub::set_response_sink`; a live
/// deployment always wires a real sink before accepting connections.
struct NoopResponseSink;

impl ResponseSink for NoopResponseSink {
    fn on_progress(&self, agent_id: &AgentId, _message_id: ctrlplane_core::MessageId, _content: String) {
        tracing::warn!(%agent_id, "no response sink registered, dropping progress frame");
    }

    fn on_response(&self, agent_id: &AgentId, _frame: ctrlplane_core::AgentResponseFrame) {
        tracing::warn!(%agent_id, "no response sink registered, dropping response frame");
    }

    fn on_agent_disconnected(&self, agent_id: &AgentId) {
        tracing::warn!(%agent_id, "no response sink registered, dropping disconnect notice");
    }
}

pub(crate) struct HubInner {
    config: HubConfig,
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    validator: Arc<Validator>,
    audit: Arc<AuditSink>,
    connections: Mutex<HashMap<AgentId, mpsc::Sender<OutboundFrame>>>,
    response_sink: OnceLock<Arc<dyn ResponseSink>>,
}

impl HubInner {
    pub(crate) fn response_sink(&self) -> Arc<dyn ResponseSink> {
        match self.response_sink.get() {
            Some(sink) => sink.clone(),
            None => Arc::new(NoopResponseSink),
        }
    }
}

impl OutboundTransport for HubInner {
    fn send(&self, agent_id: &AgentId, envelope: OutboundEnvelope) -> Result<(), ControlError> {
        let tx = self.connections.lock().get(agent_id).cloned();
        let tx = tx.ok_or_else(|| ControlError::UnknownAgent(agent_id.to_string()))?;
        let frame = OutboundFrame::Dispatch {
            message_id: envelope.message_id,
            content: envelope.content,
            context: envelope.context,
            is_followup: matches!(envelope.kind, MessageKind::Followup),
        };
        tx.try_send(frame).map_err(|_| ControlError::Busy)
    }
}

/// Owns every live bridge connection for one control context.
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

impl ConnectionHub {
    pub fn new(
        config: HubConfig,
        registry: Arc<AgentRegistry>,
        bus: Arc<EventBus>,
        validator: Arc<Validator>,
        audit: Arc<AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                registry,
                bus,
                validator,
                audit,
                connections: Mutex::new(HashMap::new()),
                response_sink: OnceLock::new(),
            }),
        }
    }

    /// Inject the dispatch router's `ResponseSink` once it exists. Must be
    /// called before the hub starts accepting connections; a second call is
    /// a no-op (the first sink wins).
    pub fn set_response_sink(&self, sink: Arc<dyn ResponseSink>) {
        let _ = self.inner.response_sink.set(sink);
    }

    /// The `OutboundTransport` handle handed to the dispatch router.
    pub fn transport(&self) -> Arc<dyn OutboundTransport> {
        self.inner.clone() as Arc<dyn OutboundTransport>
    }

    pub fn connected_agent_count(&self) -> usize {
        self.inner.connections.lock().len()
    }
}

/// Axum handler for `GET /bridge` (spec.md §6): upgrades to a WebSocket and
/// hands the connection to [`connection::handle_socket`].
pub async fn ws_upgrade_handler(
    State(hub): State<Arc<ConnectionHub>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let inner = hub.inner.clone();
    ws.on_upgrade(move |socket| connection::handle_socket(inner, socket, addr.to_string()))
}
