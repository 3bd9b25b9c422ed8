// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Simulation Engine (spec.md §4.7, C7): a tick-based multi-agent
//! conversation simulator used for local testing without live agent
//! processes, sharing the context's [`ctrlplane_bus::EventBus`] and
//! [`ctrlplane_governor::CostTracker`] so simulated activity is visible on
//! the same event stream and cost ledgers as real dispatches.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backend;
pub mod engine;
pub mod model;

pub use backend::{BackendError, GenerateRequest, GenerateResponse, ModelBackend, RealModelBackend, StubModelBackend};
pub use engine::{SimulationConfig, SimulationEngine, SimulationStateSnapshot, TickOutcome};
pub use model::{
    Budgets, Conversation, ConversationEntry, ConversationRole, EdgeSpec, FlowGraph, Roster,
    SimAgentConfig, SimRole, TickStatus, CONVERSATION_CAP,
};
