// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! The append-only event record (spec.md §3) and its closed type vocabulary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, EventId, MessageId};

/// Closed set of event types. Serializes to the lowercased form used as the
/// SSE `event:` name (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentRegistered,
    AgentDisconnected,
    AgentStatusChanged,
    TaskDispatched,
    AgentProgress,
    AgentResponse,
    FollowupSent,
    MessageSent,
    MessageBlockedByGraph,
    TickAdvanced,
    CostTracking,
    RateLimitExceeded,
    CostLimitExceeded,
    AuthFailure,
    PathViolation,
}

impl EventType {
    /// The exact lower_snake name used in SSE framing and audit logs.
    pub fn name(self) -> &'static str {
        match self {
            EventType::AgentRegistered => "agent_registered",
            EventType::AgentDisconnected => "agent_disconnected",
            EventType::AgentStatusChanged => "agent_status_changed",
            EventType::TaskDispatched => "task_dispatched",
            EventType::AgentProgress => "agent_progress",
            EventType::AgentResponse => "agent_response",
            EventType::FollowupSent => "followup_sent",
            EventType::MessageSent => "message_sent",
            EventType::MessageBlockedByGraph => "message_blocked_by_graph",
            EventType::TickAdvanced => "tick_advanced",
            EventType::CostTracking => "cost_tracking",
            EventType::RateLimitExceeded => "rate_limit_exceeded",
            EventType::CostLimitExceeded => "cost_limit_exceeded",
            EventType::AuthFailure => "auth_failure",
            EventType::PathViolation => "path_violation",
        }
    }
}

/// An immutable record appended to a control context's event ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub message: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub task_id: Option<MessageId>,
    #[serde(default)]
    pub tick_index: Option<u64>,
}

/// Fields for a not-yet-assigned event; the bus stamps `event_id` and
/// `timestamp` on publish so ordering is always assigned by one authority.
pub struct EventDraft {
    pub event_type: EventType,
    pub message: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub agent_id: Option<AgentId>,
    pub task_id: Option<MessageId>,
    pub tick_index: Option<u64>,
}

impl EventDraft {
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            message: message.into(),
            metadata: HashMap::new(),
            agent_id: None,
            task_id: None,
            tick_index: None,
        }
    }

    pub fn agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn task(mut self, task_id: MessageId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn tick(mut self, tick_index: u64) -> Self {
        self.tick_index = Some(tick_index);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), v);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names_are_lower_snake() {
        assert_eq!(EventType::AgentRegistered.name(), "agent_registered");
        assert_eq!(
            EventType::MessageBlockedByGraph.name(),
            "message_blocked_by_graph"
        );
    }

    #[test]
    fn event_type_serde_roundtrip() {
        let json = serde_json::to_string(&EventType::TickAdvanced).unwrap();
        assert_eq!(json, "\"tick_advanced\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::TickAdvanced);
    }
}
