// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Maps `ControlError` onto the HTTP surface (spec.md §6/§7): a JSON body
//! shaped `{"error": {"code", "message", "detail"}}` plus a status code,
//! with `X-RateLimit-*` headers on 429s so a caller can back off without
//! parsing the body.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ctrlplane_core::ControlError;
use serde_json::json;

pub struct ApiError(pub ControlError);

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);
        let body = Json(json!({
            "error": {
                "code": err.code(),
                "message": err.to_string(),
            }
        }));
        let mut response = (status, body).into_response();

        if let ControlError::RateLimited {
            limit,
            remaining,
            reset_secs,
        } = &err
        {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(*limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(*remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(*reset_secs));
        }
        if let ControlError::EngineBusy { retry_after_ms } = &err {
            if let Ok(value) = HeaderValue::from_str(&retry_after_ms.to_string()) {
                response.headers_mut().insert("Retry-After-Ms", value);
            }
        }

        response
    }
}

/// spec.md §6 status-code table.
fn status_for(err: &ControlError) -> StatusCode {
    match err {
        ControlError::AuthFailure => StatusCode::UNAUTHORIZED,
        ControlError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ControlError::CostExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
        ControlError::Busy => StatusCode::CONFLICT,
        ControlError::EngineBusy { .. } => StatusCode::TOO_MANY_REQUESTS,
        ControlError::InvalidSimState(_) => StatusCode::CONFLICT,
        ControlError::NoActiveTask => StatusCode::CONFLICT,
        ControlError::UnknownAgent(_) => StatusCode::NOT_FOUND,
        ControlError::Invalid(_) => StatusCode::BAD_REQUEST,
        ControlError::PathViolation(_) => StatusCode::BAD_REQUEST,
        ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
