use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Authenticated principal on whose behalf work is started, viewed or canceled.
///
/// Equality is by `id` only: two principals carrying the same identifier but
/// different role lists (e.g. loaded at different times) are the same user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    pub roles: Vec<String>,
}

impl Principal {
    /// Creates a principal with no roles.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    /// Adds a role, builder style.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Returns `true` if this principal holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Principal {}

impl std::hash::Hash for Principal {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Registry-assigned operation identifier.
///
/// Allocated from a process-wide counter, so identifiers order by
/// registration. Rendered and parsed as a plain decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct OperationId(u64);

impl OperationId {
    /// Wraps a raw counter value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a requestor-supplied identifier is not a valid [`OperationId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed operation identifier: {input:?}")]
pub struct ParseOperationIdError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for OperationId {
    type Err = ParseOperationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ParseOperationIdError {
                input: s.to_string(),
            })
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for OperationId {
    type Error = ParseOperationIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_equality_ignores_roles() {
        let a = Principal::new("alice").with_role("admin");
        let b = Principal::new("alice");
        assert_eq!(a, b);
        assert_ne!(a, Principal::new("bob"));
    }

    #[test]
    fn principal_has_role() {
        let p = Principal::new("alice").with_role("ops").with_role("admin");
        assert!(p.has_role("admin"));
        assert!(!p.has_role("auditor"));
    }

    #[test]
    fn operation_id_parses_decimal() {
        let id: OperationId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn operation_id_rejects_garbage() {
        let err = "INVALID".parse::<OperationId>().unwrap_err();
        assert_eq!(err.input, "INVALID");
        assert!("-1".parse::<OperationId>().is_err());
        assert!("".parse::<OperationId>().is_err());
    }

    #[test]
    fn operation_id_serializes_as_string() {
        let json = serde_json::to_string(&OperationId::new(7)).unwrap();
        assert_eq!(json, "\"7\"");
        let back: OperationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OperationId::new(7));
    }
}
