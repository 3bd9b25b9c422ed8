// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Auth & Audit (spec.md §4.1, C1): bearer-token validation and the
//! structured audit sink every other component writes through.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod audit;
pub mod validate;

pub use audit::{fingerprint, AuditRecord, AuditSink};
pub use ctrlplane_core::validation::validate_workdir;
pub use validate::{AuthConfig, Principal, Validator};
