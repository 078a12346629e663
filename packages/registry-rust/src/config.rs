use serde::Deserialize;

use crate::security::DefaultPolicy;

/// Registry-level configuration supplied by the embedding application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Policy for registrations that do not bring their own security callback.
    pub default_policy: DefaultPolicy,
    /// How many completed operations stay resolvable by identifier.
    /// Zero disables the ring.
    pub recently_finished_capacity: usize,
    /// Longest accepted operation code, in bytes.
    pub max_code_len: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_policy: DefaultPolicy::AllowAll,
            recently_finished_capacity: 64,
            max_code_len: 256,
        }
    }
}
