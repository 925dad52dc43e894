//! Actor Identity Types
//!
//! Actors are referenced by opaque string ids resolved by the identity
//! directory outside this core. The engine never inspects the id format.

use serde::{Deserialize, Serialize};

/// Opaque actor identifier (directory user id, e.g. "U1").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Directory profile for a project member, as returned by the identity
/// directory. Pickers outside this core use these to offer candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberProfile {
    pub actor_id: ActorId,
    pub display_name: String,
    pub base_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_serde_transparent() {
        let id = ActorId::new("U1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"U1\"");
        let back: ActorId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
