// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! The composition root (spec.md §4.8, C8 + C6): wires every component
//! built elsewhere in the workspace into one axum `Router`, following the
//! public/protected-merge-then-layer pattern used across the retrieval
//! pack's HTTP servers.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod api;
pub mod auth_mw;
pub mod config;
pub mod context;
pub mod error;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use context::ControlContext;

/// Build the full HTTP router: the Control API (auth-protected) plus the
/// agent bridge WebSocket upgrade (auth happens inside the bridge
/// handshake itself, per spec.md §4.4, not via this middleware).
pub fn build_router(ctx: Arc<ControlContext>) -> Router {
    let protected = api::router()
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth_mw::require_auth,
        ))
        .with_state(ctx.clone());

    let bridge = Router::new()
        .route("/bridge", get(ctrlplane_hub::ws_upgrade_handler))
        .with_state(ctx.hub.clone());

    Router::new()
        .merge(protected)
        .merge(bridge)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
