// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Bearer-token auth middleware (spec.md §4.1, C1): every protected route
//! runs through `ctrlplane_auth::Validator` first, and every attempt —
//! pass or fail — is recorded on the audit sink before the request reaches
//! its handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use ctrlplane_auth::{fingerprint, AuditRecord};

use crate::error::ApiError;
use crate::ControlContext;

pub async fn require_auth(
    State(ctx): State<Arc<ControlContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credential = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let result = ctx.validator.validate(credential);

    ctx.audit.record(&AuditRecord {
        timestamp: chrono::Utc::now(),
        event: "auth.validate",
        outcome: if result.is_ok() { "pass" } else { "fail" },
        credential_fingerprint: credential.map(fingerprint),
        peer_address: Some(addr.ip().to_string()),
        detail: None,
    });

    result?;
    Ok(next.run(request).await)
}
