//! Token validation seam
//!
//! Token issuance is an external collaborator: clients arrive with an
//! opaque credential and the hub only asks "is it valid right now". The
//! trait is the seam; deployments plug their verifier in, tests plug in a
//! static set.

use std::collections::HashSet;

pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

/// Accepts a fixed set of tokens (env-configured deployments, tests)
pub struct StaticTokenValidator {
    tokens: HashSet<String>,
}

impl StaticTokenValidator {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    pub fn single(token: impl Into<String>) -> Self {
        Self::new([token.into()])
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

/// Accepts everything; development only
pub struct AllowAllValidator;

impl TokenValidator for AllowAllValidator {
    fn validate(&self, _token: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_validator() {
        let v = StaticTokenValidator::new(["alpha".to_string(), "beta".to_string()]);
        assert!(v.validate("alpha"));
        assert!(!v.validate("gamma"));
        assert!(!v.validate(""));
    }
}
