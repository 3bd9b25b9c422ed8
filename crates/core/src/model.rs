// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! The agent / message / response data model (spec.md §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::ids::{AgentId, MessageId};

/// Maximum content length for a dispatch or follow-up message.
pub const MAX_CONTENT_CHARS: usize = 10_000;

pub fn validate_content_len(content: &str) -> Result<(), ControlError> {
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ControlError::Invalid(format!(
            "content exceeds {MAX_CONTENT_CHARS} chars"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unregistered,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Dispatched,
    Running,
    Completed,
    Error,
}

impl TaskState {
    /// Dispatch is only admitted from these states (spec.md §4.5).
    pub fn accepts_dispatch(self) -> bool {
        matches!(self, TaskState::Idle | TaskState::Completed | TaskState::Error)
    }
}

/// A registered agent and its current connection/task state.
///
/// Owned exclusively by the Control Context; the Connection Hub looks agents
/// up by id rather than retaining handles into this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: AgentId,
    pub display_name: String,
    pub capabilities: Vec<String>,
    pub workdir: Option<String>,
    pub connection_state: ConnectionState,
    pub task_state: TaskState,
    pub active_message_id: Option<MessageId>,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl AgentRegistration {
    pub fn new(agent_id: AgentId, display_name: String, capabilities: Vec<String>) -> Self {
        Self {
            agent_id,
            display_name,
            capabilities,
            workdir: None,
            connection_state: ConnectionState::Unregistered,
            task_state: TaskState::Idle,
            active_message_id: None,
            last_error: None,
            connected_at: None,
            last_heartbeat_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Dispatch,
    Followup,
}

/// A dispatch or follow-up request bound for an agent (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub message_id: MessageId,
    pub agent_id: AgentId,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Progress,
    Response,
    Error,
}

/// A progress or final response frame received from an agent bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponseFrame {
    pub message_id: MessageId,
    pub kind: ResponseKind,
    pub content: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_boundary_10000_ok_10001_rejected() {
        let ok = "a".repeat(MAX_CONTENT_CHARS);
        let bad = "a".repeat(MAX_CONTENT_CHARS + 1);
        assert!(validate_content_len(&ok).is_ok());
        assert!(validate_content_len(&bad).is_err());
    }

    #[test]
    fn task_state_accepts_dispatch_matrix() {
        assert!(TaskState::Idle.accepts_dispatch());
        assert!(TaskState::Completed.accepts_dispatch());
        assert!(TaskState::Error.accepts_dispatch());
        assert!(!TaskState::Dispatched.accepts_dispatch());
        assert!(!TaskState::Running.accepts_dispatch());
    }
}
