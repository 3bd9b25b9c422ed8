// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Identifier newtypes.
//!
//! `AgentId`, `MessageId`, and `EventId` are kept distinct so call sites
//! cannot accidentally pass one where another is expected.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ControlError;

/// Agent identifier: `^[A-Za-z0-9._-]{1,64}$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The "user" pseudo-agent used as the seed sender in simulations. It is
    /// exempt from the charset/registration checks that apply to real agents.
    pub fn user() -> Self {
        Self("user".to_string())
    }

    pub fn is_user(&self) -> bool {
        self.0 == "user"
    }
}

impl TryFrom<String> for AgentId {
    type Error = ControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_agent_id(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for AgentId {
    type Error = ControlError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

fn validate_agent_id(s: &str) -> Result<(), ControlError> {
    if s == "user" {
        return Ok(());
    }
    if s.is_empty() || s.len() > 64 {
        return Err(ControlError::Invalid(format!(
            "agent_id must be 1-64 chars, got {}",
            s.len()
        )));
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    {
        return Err(ControlError::Invalid(
            "agent_id may only contain [A-Za-z0-9._-]".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for AgentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for AgentId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Identifier for a dispatch or follow-up message; echoed on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing per-context event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        short = { "a1", true },
        max_len = { "0123456789012345678901234567890123456789012345678901234567890a", true },
        too_long = { "01234567890123456789012345678901234567890123456789012345678901234", false },
        dots_underscores_dashes = { "a.b_c-d", true },
        empty = { "", false },
        bad_char = { "a b", false },
        user_pseudo_agent = { "user", true },
    )]
    fn agent_id_validation(input: &str, should_pass: bool) {
        assert_eq!(AgentId::try_from(input).is_ok(), should_pass);
    }

    #[test]
    fn agent_id_length_boundary_64_ok_65_rejected() {
        let ok: String = "a".repeat(64);
        let bad: String = "a".repeat(65);
        assert!(AgentId::try_from(ok).is_ok());
        assert!(AgentId::try_from(bad).is_err());
    }
}
