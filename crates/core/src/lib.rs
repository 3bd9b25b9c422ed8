// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Shared domain types for the control plane: identifiers, the agent/task/
//! event data model, error taxonomy, and the cross-crate ports (traits) that
//! let the hub, dispatch router, and simulation engine compose without
//! depending on one another directly.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod event;
pub mod ids;
pub mod model;
pub mod ports;
pub mod registry;
pub mod validation;

pub use error::ControlError;
pub use event::{Event, EventType};
pub use ids::{AgentId, EventId, MessageId};
pub use model::{
    AgentRegistration, AgentResponseFrame, ConnectionState, ControlMessage, MessageKind,
    ResponseKind, TaskState, Usage,
};
pub use ports::{OutboundEnvelope, OutboundTransport, ResponseSink};
pub use registry::AgentRegistry;
