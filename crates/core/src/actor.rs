//! Actor identity recorded on audit rows.

use serde::{Deserialize, Serialize};

/// Who performed a mutation (admin login, or a well-known system name for
/// unauthenticated flows such as storefront checkout).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    /// Name used for mutations driven by the public storefront.
    pub fn storefront() -> Self {
        Self("storefront".to_string())
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Actor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
