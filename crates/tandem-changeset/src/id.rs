// id.rs — Strongly typed identifiers for change sets, workspaces and users.
//
// Change set and workspace ids are opaque UUIDs assigned by the server.
// The nil UUID is reserved for the mainline change set ("HEAD"): it is
// injected locally and never sent to the server as a creation target.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChangeSetError;

/// Route token that navigation uses for "the current mainline view".
pub const HEAD_ROUTE_TOKEN: &str = "head";

/// Identifier of one change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSetId(Uuid);

impl ChangeSetId {
    /// The reserved sentinel id of the mainline change set.
    pub const HEAD: ChangeSetId = ChangeSetId(Uuid::nil());

    /// Generate a fresh random id (server side and tests).
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// True for the mainline sentinel.
    pub fn is_head(&self) -> bool {
        self.0.is_nil()
    }

    /// Resolve a navigation-provided token to an id.
    ///
    /// `"head"` maps to [`ChangeSetId::HEAD`]; anything that is not a UUID
    /// resolves to no selection at all.
    pub fn from_route(token: &str) -> Option<Self> {
        if token == HEAD_ROUTE_TOKEN {
            return Some(Self::HEAD);
        }
        token.parse().ok()
    }
}

impl fmt::Display for ChangeSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeSetId {
    type Err = ChangeSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|source| ChangeSetError::InvalidId {
                value: s.to_string(),
                source,
            })
    }
}

/// Identifier of a workspace, the tenancy boundary of one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(Uuid);

impl WorkspaceId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkspaceId {
    type Err = ChangeSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|source| ChangeSetError::InvalidId {
                value: s.to_string(),
                source,
            })
    }
}

/// Identifier of a collaborator (voter, requester, actor).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_is_nil_uuid() {
        assert!(ChangeSetId::HEAD.is_head());
        assert_eq!(
            ChangeSetId::HEAD.to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
        assert!(!ChangeSetId::new_v4().is_head());
    }

    #[test]
    fn head_route_token_maps_to_sentinel() {
        assert_eq!(ChangeSetId::from_route("head"), Some(ChangeSetId::HEAD));
    }

    #[test]
    fn route_token_parses_uuid_or_yields_none() {
        let id = ChangeSetId::new_v4();
        assert_eq!(ChangeSetId::from_route(&id.to_string()), Some(id));
        assert_eq!(ChangeSetId::from_route("not-a-change-set"), None);
        assert_eq!(ChangeSetId::from_route(""), None);
    }

    #[test]
    fn invalid_id_reports_value() {
        let err = "bogus".parse::<ChangeSetId>().unwrap_err();
        assert!(err.to_string().contains("'bogus'"));
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = ChangeSetId::new_v4();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let user = UserId::from("user-7");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"user-7\"");
    }
}
