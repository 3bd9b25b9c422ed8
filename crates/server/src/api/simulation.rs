// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! `POST /simulation/*`, `GET /simulation/state` (spec.md §4.6/§4.7, C7).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use ctrlplane_core::AgentId;
use ctrlplane_sim::{EdgeSpec, SimAgentConfig, SimulationStateSnapshot, TickOutcome};
use serde::Deserialize;

use crate::error::ApiError;
use crate::ControlContext;

pub async fn init(
    State(ctx): State<Arc<ControlContext>>,
    Json(agents): Json<Vec<SimAgentConfig>>,
) -> Result<Json<()>, ApiError> {
    ctx.sim.init_roster(agents)?;
    Ok(Json(()))
}

pub async fn graph(
    State(ctx): State<Arc<ControlContext>>,
    Json(edges): Json<Vec<EdgeSpec>>,
) -> Result<Json<()>, ApiError> {
    ctx.sim.set_graph(edges)?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub initial_prompt: String,
    pub first_agent_id: String,
}

pub async fn start(
    State(ctx): State<Arc<ControlContext>>,
    Json(req): Json<StartRequest>,
) -> Result<Json<()>, ApiError> {
    let first_agent_id = AgentId::try_from(req.first_agent_id)?;
    ctx.sim.start(req.initial_prompt, first_agent_id)?;
    Ok(Json(()))
}

pub async fn tick(State(ctx): State<Arc<ControlContext>>) -> Result<Json<TickOutcome>, ApiError> {
    let outcome = ctx.sim.tick().await?;
    Ok(Json(outcome))
}

pub async fn pause(State(ctx): State<Arc<ControlContext>>) -> Result<Json<()>, ApiError> {
    ctx.sim.pause()?;
    Ok(Json(()))
}

pub async fn stop(State(ctx): State<Arc<ControlContext>>) -> Result<Json<()>, ApiError> {
    ctx.sim.stop()?;
    Ok(Json(()))
}

pub async fn reset(State(ctx): State<Arc<ControlContext>>) -> Json<()> {
    ctx.reset_simulation();
    Json(())
}

pub async fn state(State(ctx): State<Arc<ControlContext>>) -> Json<SimulationStateSnapshot> {
    Json(ctx.sim.state_snapshot())
}
