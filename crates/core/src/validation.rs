// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Input validation shared by the handshake and the manual registration
//! endpoint. Workspace path sandboxing is ultimately enforced on the agent
//! side (spec.md §3: `workdir` is "validated at the agent side only"), but
//! the Security Gate still rejects declarations that are obviously
//! malformed or attempt traversal, emitting `PATH_VIOLATION` (spec.md §2).

use crate::error::ControlError;

/// Reject a declared `workdir` that is not absolute or that contains a `..`
/// component. This is a shallow sanity check, not a chroot: the real
/// enforcement point is the bridge process itself.
pub fn validate_workdir(workdir: &str) -> Result<(), ControlError> {
    if workdir.is_empty() {
        return Err(ControlError::PathViolation("workdir must not be empty".to_string()));
    }
    if !workdir.starts_with('/') {
        return Err(ControlError::PathViolation(format!(
            "workdir {workdir} must be an absolute path"
        )));
    }
    if workdir.split('/').any(|segment| segment == "..") {
        return Err(ControlError::PathViolation(format!(
            "workdir {workdir} must not contain '..' components"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        absolute = { "/home/agent/work", true },
        relative = { "relative/path", false },
        traversal = { "/home/agent/../../etc", false },
        empty = { "", false },
    )]
    fn workdir_validation(input: &str, should_pass: bool) {
        assert_eq!(validate_workdir(input).is_ok(), should_pass);
    }
}
