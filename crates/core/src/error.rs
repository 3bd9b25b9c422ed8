// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Error taxonomy shared by every component. Each variant maps 1:1 onto an
//! HTTP status / bridge close code at the edges (see `ctrlplane-server` and
//! `ctrlplane-hub` for the mapping).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ControlError {
    #[error("authentication failed")]
    AuthFailure,

    #[error("rate limit exceeded")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_secs: u64,
    },

    #[error("cost limit exceeded")]
    CostExceeded { limit_usd: f64, projected_usd: f64 },

    #[error("agent busy with an in-flight task")]
    Busy,

    #[error("simulation engine busy: tick requested before tick_rate_limit_ms elapsed")]
    EngineBusy { retry_after_ms: u64 },

    #[error("simulation is not in a state that accepts this operation")]
    InvalidSimState(String),

    #[error("no active task for agent")]
    NoActiveTask,

    #[error("unknown agent {0}")]
    UnknownAgent(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("workspace path violation: {0}")]
    PathViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Stable machine-readable code, used in HTTP error bodies and audit
    /// records.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::AuthFailure => "auth_failure",
            ControlError::RateLimited { .. } => "rate_limited",
            ControlError::CostExceeded { .. } => "cost_limit_exceeded",
            ControlError::Busy => "busy",
            ControlError::EngineBusy { .. } => "engine_busy",
            ControlError::InvalidSimState(_) => "invalid_sim_state",
            ControlError::NoActiveTask => "no_active_task",
            ControlError::UnknownAgent(_) => "unknown_agent",
            ControlError::Invalid(_) => "invalid",
            ControlError::PathViolation(_) => "path_violation",
            ControlError::Internal(_) => "internal",
        }
    }
}
