//! Command gateway seam.
//!
//! The session core never talks to a socket. Every remote operation goes
//! through a [`CommandGateway`], which returns either a typed payload or a
//! [`GatewayError`]. The HTTP transport behind it, and any retry policy, are
//! the gateway's business.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_changeset::{ChangeSet, ChangeSetId, WorkspaceId};
use tandem_events::VoteKind;
use thiserror::Error;

/// Failure reported by the remote side (or the transport on its behalf).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct GatewayError {
    /// Gateway operation that failed (e.g., "apply_change_set").
    pub operation: String,
    /// Remote-provided reason, passed through verbatim.
    pub message: String,
}

impl GatewayError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// The explicit (workspace, change set) pair every scoped command carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Visibility {
    pub workspace_id: WorkspaceId,
    pub change_set_id: ChangeSetId,
}

impl Visibility {
    pub fn new(workspace_id: WorkspaceId, change_set_id: ChangeSetId) -> Self {
        Self {
            workspace_id,
            change_set_id,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.change_set_id, self.workspace_id)
    }
}

/// Remote operations the session core issues.
///
/// Implementations must be safe to call while realtime events for the same
/// change set are being reconciled: a response may arrive after the event
/// describing its effect.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// List the open change sets of a workspace, in server order.
    async fn list_open_change_sets(&self, workspace_id: &WorkspaceId) -> Result<Vec<ChangeSet>>;

    /// Create a change set branched from the mainline.
    async fn create_change_set(&self, workspace_id: &WorkspaceId, name: &str)
        -> Result<ChangeSet>;

    /// Abandon a change set. The payload is not consumed locally.
    async fn abandon_change_set(&self, target: &Visibility) -> Result<()>;

    /// Apply a change set; returns the applied record.
    async fn apply_change_set(&self, target: &Visibility) -> Result<ChangeSet>;

    /// Cast a merge or abandon vote.
    async fn cast_vote(&self, target: &Visibility, kind: VoteKind, vote: &str) -> Result<()>;

    async fn begin_approval_process(&self, target: &Visibility) -> Result<()>;

    async fn cancel_approval_process(&self, target: &Visibility) -> Result<()>;

    async fn begin_abandon_process(&self, target: &Visibility) -> Result<()>;

    async fn cancel_abandon_process(&self, target: &Visibility) -> Result<()>;

    /// Gateway display name (for logs).
    fn name(&self) -> &str;
}
