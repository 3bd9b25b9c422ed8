// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! `GET /control/context` (spec.md §4.6, C8).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::context::ContextSummary;
use crate::ControlContext;

pub async fn get_context(State(ctx): State<Arc<ControlContext>>) -> Json<ContextSummary> {
    Json(ctx.context_summary())
}
