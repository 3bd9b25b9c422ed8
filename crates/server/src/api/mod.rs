// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! HTTP handlers for the Control API (spec.md §4.6). Each module groups the
//! endpoints for one component; `router()` assembles the full protected
//! surface mounted by `ctrlplane-server::build_router`.

pub mod agents;
pub mod context;
pub mod dispatch;
pub mod events;
pub mod simulation;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::ControlContext;

pub fn router() -> Router<Arc<ControlContext>> {
    Router::new()
        .route("/control/context", get(context::get_context))
        .route("/agents/register", post(agents::register))
        .route("/agents", get(agents::list))
        .route("/agents/:id", get(agents::detail))
        .route("/agents/:id/dispatch", post(dispatch::dispatch))
        .route("/agents/:id/followup", post(dispatch::followup))
        .route("/agents/:id/task", get(dispatch::task))
        .route("/agents/:id/events", get(events::agent_events))
        .route("/events", get(events::all_events))
        .route("/simulation/init", post(simulation::init))
        .route("/simulation/graph", post(simulation::graph))
        .route("/simulation/start", post(simulation::start))
        .route("/simulation/tick", post(simulation::tick))
        .route("/simulation/pause", post(simulation::pause))
        .route("/simulation/stop", post(simulation::stop))
        .route("/simulation/reset", post(simulation::reset))
        .route("/simulation/state", get(simulation::state))
}
