// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Cross-component ports (trait seams).
//!
//! The dispatch router and connection hub never depend on one another's
//! crate directly (the dependency order in spec.md §2 puts the hub, C4,
//! strictly before the dispatch router, C5, yet design note §9 requires the
//! two to call into each other). These traits break the cycle: each crate
//! depends only on `ctrlplane-core`, and the composition root
//! (`ctrlplane-server`) wires concrete implementations together.

use std::collections::HashMap;

use crate::error::ControlError;
use crate::ids::{AgentId, MessageId};
use crate::model::{AgentResponseFrame, MessageKind};

/// A dispatch or follow-up envelope ready to be written to an agent's socket.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    pub message_id: MessageId,
    pub kind: MessageKind,
    pub content: String,
    pub context: HashMap<String, serde_json::Value>,
}

/// Implemented by the Connection Hub. The dispatch router hands off an
/// envelope and returns immediately; only the hub ever writes to a socket.
pub trait OutboundTransport: Send + Sync {
    /// Enqueue `envelope` for delivery to `agent_id`. Returns an error
    /// immediately if the agent has no live connection — the caller (the
    /// dispatch router) then transitions the task to `ERROR`.
    fn send(&self, agent_id: &AgentId, envelope: OutboundEnvelope) -> Result<(), ControlError>;
}

/// Implemented by the Dispatch Router. The Connection Hub calls this for
/// every inbound `progress`/`response`/`error` frame it relays.
pub trait ResponseSink: Send + Sync {
    fn on_progress(&self, agent_id: &AgentId, message_id: MessageId, content: String);

    fn on_response(&self, agent_id: &AgentId, frame: AgentResponseFrame);

    /// The hub calls this when a bridge disconnects mid-task (clean close,
    /// protocol error, or missed heartbeats) so the task can be failed with
    /// reason `agent_disconnected` (spec.md §7).
    fn on_agent_disconnected(&self, agent_id: &AgentId);
}
