// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! `POST /agents/{id}/dispatch`, `/followup`, `GET /agents/{id}/task`
//! (spec.md §4.6, C5). Dispatch-type admissions run C1 (already enforced by
//! the auth middleware) then C2 rate/cost admission before handing off to
//! the dispatch router, per spec.md §4.6's "Each operation runs through C1
//! then C2" note.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::Json;
use ctrlplane_core::AgentId;
use ctrlplane_dispatch::{DispatchOutcome, TaskStatus};
use serde::Deserialize;

use crate::error::ApiError;
use crate::ControlContext;

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub content: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FollowupRequest {
    pub content: String,
}

/// Rough pre-admission cost estimate for a dispatch's prompt, mirroring
/// `ctrlplane_sim::engine`'s `estimate_tokens` heuristic (chars / 4) so both
/// call sites project cost the same way before their own `check_projected`
/// (spec.md §4.2: "before admitting a dispatch that will call a paid
/// backend, the governor checks... the projected cost (estimate)"). The
/// actual usage-based charge still only happens once the agent replies
/// (spec.md §4.5 `on_response`) — this only gates admission.
fn estimate_dispatch_cost(ctx: &ControlContext, content: &str) -> f64 {
    let estimated_tokens = (content.chars().count() as u64 / 4).max(1);
    ctx.cost.estimate_tokens(estimated_tokens)
}

pub async fn dispatch(
    State(ctx): State<Arc<ControlContext>>,
    Path(id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<DispatchRequest>,
) -> Result<Json<DispatchOutcome>, ApiError> {
    let agent_id = AgentId::try_from(id)?;
    ctx.rate.admit(agent_id.as_str(), &addr.ip().to_string())?;
    ctx.cost.check_projected(estimate_dispatch_cost(&ctx, &req.content))?;

    let outcome = ctx.dispatch.dispatch(&agent_id, req.content, req.context)?;
    Ok(Json(outcome))
}

pub async fn followup(
    State(ctx): State<Arc<ControlContext>>,
    Path(id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<FollowupRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent_id = AgentId::try_from(id)?;
    ctx.rate.admit(agent_id.as_str(), &addr.ip().to_string())?;

    let status = ctx.dispatch.followup(&agent_id, req.content)?;
    Ok(Json(serde_json::json!({ "status": status })))
}

pub async fn task(
    State(ctx): State<Arc<ControlContext>>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatus>, ApiError> {
    let agent_id = AgentId::try_from(id)?;
    let status = ctx.dispatch.status(&agent_id)?;
    Ok(Json(status))
}
