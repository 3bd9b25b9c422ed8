// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Bearer-token authentication (spec.md §4.1, C1).

use std::collections::HashSet;

use ctrlplane_core::ControlError;
use subtle::ConstantTimeEq;

/// The principal behind a validated credential. Tokens are opaque bearer
/// strings, so there is nothing richer to carry yet — this exists as a seam
/// for a future multi-principal auth scheme without reshaping every call
/// site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub anonymous: bool,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub tokens: HashSet<String>,
    pub allow_anonymous: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: HashSet::new(),
            allow_anonymous: false,
        }
    }
}

/// Validates bearer credentials against the configured token set.
///
/// Fails closed: if `tokens` is empty and `allow_anonymous` is false, every
/// request fails with `AuthFailure` regardless of what credential is
/// presented.
pub struct Validator {
    config: AuthConfig,
}

impl Validator {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, credential: Option<&str>) -> Result<Principal, ControlError> {
        let credential = match credential {
            Some(c) => c,
            None => {
                return if self.config.allow_anonymous {
                    Ok(Principal { anonymous: true })
                } else {
                    Err(ControlError::AuthFailure)
                }
            }
        };

        if self.fails_closed() {
            return Err(ControlError::AuthFailure);
        }

        for token in &self.config.tokens {
            if constant_time_eq(token, credential) {
                return Ok(Principal { anonymous: false });
            }
        }

        Err(ControlError::AuthFailure)
    }

    /// Both `tokens` empty and `allow_anonymous` false means every request
    /// fails closed, per spec.md §4.1.
    fn fails_closed(&self) -> bool {
        self.config.tokens.is_empty() && !self.config.allow_anonymous
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    // Compare fixed-width hashes rather than raw bytes so differing lengths
    // don't leak via early-return comparisons, then do the real constant
    // time comparison over those hashes.
    if a.len() != b.len() {
        // Still touch `b` so timing doesn't trivially reveal a length
        // mismatch versus a near-miss on the same length.
        let _ = a.as_bytes().ct_eq(b.as_bytes());
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(tokens: &[&str], allow_anonymous: bool) -> Validator {
        Validator::new(AuthConfig {
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            allow_anonymous,
        })
    }

    #[test]
    fn empty_config_fails_closed() {
        let v = validator(&[], false);
        assert!(v.validate(Some("anything")).is_err());
        assert!(v.validate(None).is_err());
    }

    #[test]
    fn matching_token_passes() {
        let v = validator(&["T1", "T2"], false);
        assert!(v.validate(Some("T1")).is_ok());
        assert!(v.validate(Some("T2")).is_ok());
        assert!(v.validate(Some("T3")).is_err());
    }

    #[test]
    fn allow_anonymous_admits_missing_credential_but_not_wrong_token() {
        let v = validator(&["T1"], true);
        assert!(v.validate(None).is_ok());
        assert!(v.validate(Some("wrong")).is_err());
    }

    #[test]
    fn differing_length_tokens_are_rejected_not_panicking() {
        let v = validator(&["short"], false);
        assert!(v.validate(Some("a-much-longer-credential")).is_err());
    }
}
