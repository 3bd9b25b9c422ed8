// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! `POST /agents/register`, `GET /agents`, `GET /agents/{id}` (spec.md §4.6,
//! C4/C5). Registration here only records metadata — a live socket still
//! has to complete the bridge handshake (spec.md §4.4) before the agent is
//! `connected`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use ctrlplane_auth::validate_workdir;
use ctrlplane_core::{AgentId, AgentRegistration};
use serde::Deserialize;

use crate::error::ApiError;
use crate::ControlContext;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub display_name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
}

pub async fn register(
    State(ctx): State<Arc<ControlContext>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AgentRegistration>, ApiError> {
    let agent_id = AgentId::try_from(req.agent_id)?;
    if let Some(workdir) = &req.workdir {
        validate_workdir(workdir)?;
    }
    ctx.registry
        .preregister(agent_id.clone(), req.display_name, req.capabilities);
    let reg = ctx.registry.get(&agent_id).ok_or_else(|| {
        ApiError(ctrlplane_core::ControlError::Internal(
            "agent vanished immediately after preregistration".to_string(),
        ))
    })?;
    Ok(Json(reg))
}

pub async fn list(State(ctx): State<Arc<ControlContext>>) -> Json<Vec<AgentRegistration>> {
    Json(ctx.registry.list())
}

pub async fn detail(
    State(ctx): State<Arc<ControlContext>>,
    Path(id): Path<String>,
) -> Result<Json<AgentRegistration>, ApiError> {
    let agent_id = AgentId::try_from(id)?;
    ctx.registry
        .get(&agent_id)
        .map(Json)
        .ok_or_else(|| ApiError(ctrlplane_core::ControlError::UnknownAgent(agent_id.to_string())))
}
