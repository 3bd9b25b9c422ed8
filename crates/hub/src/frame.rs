// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Bridge protocol frames (spec.md §6). JSON frames over a bidirectional
//! WebSocket, tagged by `type`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ctrlplane_core::{MessageId, Usage};
use serde::{Deserialize, Serialize};

/// Frames sent by the agent bridge to the hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundFrame {
    #[serde(rename = "register")]
    Register {
        agent_id: String,
        auth_token: String,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        workdir: Option<String>,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat { ts: DateTime<Utc> },
    #[serde(rename = "progress")]
    Progress { message_id: MessageId, content: String },
    #[serde(rename = "response")]
    Response {
        message_id: MessageId,
        content: String,
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Frames sent by the hub to the agent bridge.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    #[serde(rename = "registered")]
    Registered {
        session_id: String,
        server_time: DateTime<Utc>,
    },
    #[serde(rename = "dispatch")]
    Dispatch {
        message_id: MessageId,
        content: String,
        #[serde(skip_serializing_if = "HashMap::is_empty")]
        context: HashMap<String, serde_json::Value>,
        is_followup: bool,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
    #[serde(rename = "close")]
    Close { reason: String },
}

/// Close codes used when the hub tears down a connection (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    AuthFailure,
    ProtocolError,
    HeartbeatTimeout,
    AgentReplaced,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            CloseCode::AuthFailure => 4001,
            CloseCode::ProtocolError => 4002,
            CloseCode::HeartbeatTimeout => 4003,
            CloseCode::AgentReplaced => 4004,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::AuthFailure => "auth_failure",
            CloseCode::ProtocolError => "protocol_error",
            CloseCode::HeartbeatTimeout => "heartbeat_timeout",
            CloseCode::AgentReplaced => "agent_replaced",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_frame_deserializes() {
        let json = r#"{"type":"register","agent_id":"a1","auth_token":"T1"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        matches!(frame, InboundFrame::Register { .. });
    }

    #[test]
    fn dispatch_frame_serializes_with_tag() {
        let frame = OutboundFrame::Dispatch {
            message_id: MessageId::new(),
            content: "hi".to_string(),
            context: HashMap::new(),
            is_followup: false,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"dispatch\""));
        assert!(!json.contains("\"context\""));
    }

    #[test]
    fn close_codes_match_spec() {
        assert_eq!(CloseCode::AuthFailure.code(), 4001);
        assert_eq!(CloseCode::ProtocolError.code(), 4002);
        assert_eq!(CloseCode::HeartbeatTimeout.code(), 4003);
        assert_eq!(CloseCode::AgentReplaced.code(), 4004);
    }
}
