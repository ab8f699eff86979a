// changeset.rs — The change set record and its lifecycle state machine.
//
// The state machine:
//   Open → NeedsApproval → Applied
//   Open → NeedsAbandonApproval → Abandoned
//   NeedsApproval / NeedsAbandonApproval → Open (cancelled vote)
//   Open → Applied / Abandoned (direct apply or abandon)
//
// Applied and Abandoned are terminal. The server is the authority for every
// transition; this graph only gates what a client may request.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChangeSetError;
use crate::id::{ChangeSetId, UserId};

/// Fixed display name of the mainline change set.
pub const HEAD_NAME: &str = "head";

/// The lifecycle state of a change set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    /// Editable; the initial state and the state a cancelled vote returns to.
    Open,
    /// A merge vote is running.
    NeedsApproval,
    /// An abandon vote is running.
    NeedsAbandonApproval,
    /// Merged into the mainline.
    Applied,
    /// Discarded.
    Abandoned,
}

impl fmt::Display for ChangeSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeSetStatus::Open => write!(f, "open"),
            ChangeSetStatus::NeedsApproval => write!(f, "needs_approval"),
            ChangeSetStatus::NeedsAbandonApproval => write!(f, "needs_abandon_approval"),
            ChangeSetStatus::Applied => write!(f, "applied"),
            ChangeSetStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl ChangeSetStatus {
    /// Whether a change set in this state still counts as "open" for listing.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ChangeSetStatus::Open
                | ChangeSetStatus::NeedsApproval
                | ChangeSetStatus::NeedsAbandonApproval
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// Check whether transitioning from this state to `next` is valid.
    pub fn can_transition_to(&self, next: ChangeSetStatus) -> bool {
        matches!(
            (self, next),
            (ChangeSetStatus::Open, ChangeSetStatus::NeedsApproval)
                | (ChangeSetStatus::Open, ChangeSetStatus::NeedsAbandonApproval)
                | (ChangeSetStatus::Open, ChangeSetStatus::Applied)
                | (ChangeSetStatus::Open, ChangeSetStatus::Abandoned)
                | (ChangeSetStatus::NeedsApproval, ChangeSetStatus::Open)
                | (ChangeSetStatus::NeedsApproval, ChangeSetStatus::Applied)
                | (ChangeSetStatus::NeedsAbandonApproval, ChangeSetStatus::Open)
                | (ChangeSetStatus::NeedsAbandonApproval, ChangeSetStatus::Abandoned)
        )
    }
}

/// One isolated editing context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Server-assigned identifier ([`ChangeSetId::HEAD`] for the mainline).
    pub id: ChangeSetId,

    /// Display label.
    pub name: String,

    /// Current lifecycle state.
    pub status: ChangeSetStatus,

    /// When the merge vote was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_requested_at: Option<DateTime<Utc>>,

    /// Who requested the merge vote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_requested_by_user_id: Option<UserId>,

    /// When the abandon vote was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandon_requested_at: Option<DateTime<Utc>>,

    /// Who requested the abandon vote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandon_requested_by_user_id: Option<UserId>,
}

impl ChangeSet {
    /// Create an `Open` change set record.
    pub fn new(id: ChangeSetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: ChangeSetStatus::Open,
            merge_requested_at: None,
            merge_requested_by_user_id: None,
            abandon_requested_at: None,
            abandon_requested_by_user_id: None,
        }
    }

    /// The synthetic mainline record. Always `Open`, fixed name.
    pub fn head() -> Self {
        Self::new(ChangeSetId::HEAD, HEAD_NAME)
    }

    pub fn is_head(&self) -> bool {
        self.id.is_head()
    }

    /// Transition to a new state, validating against the lifecycle graph.
    pub fn transition(&mut self, next: ChangeSetStatus) -> Result<(), ChangeSetError> {
        self.check_transition(next)?;
        self.status = next;
        Ok(())
    }

    /// Validate a transition without performing it.
    pub fn check_transition(&self, next: ChangeSetStatus) -> Result<(), ChangeSetError> {
        if !self.status.can_transition_to(next) {
            return Err(ChangeSetError::InvalidTransition {
                change_set_id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        Ok(())
    }

    /// Enter `NeedsApproval`, stamping the requester.
    pub fn request_merge(&mut self, by: UserId, at: DateTime<Utc>) {
        self.status = ChangeSetStatus::NeedsApproval;
        self.merge_requested_at = Some(at);
        self.merge_requested_by_user_id = Some(by);
    }

    /// Enter `NeedsAbandonApproval`, stamping the requester.
    pub fn request_abandon(&mut self, by: UserId, at: DateTime<Utc>) {
        self.status = ChangeSetStatus::NeedsAbandonApproval;
        self.abandon_requested_at = Some(at);
        self.abandon_requested_by_user_id = Some(by);
    }
}
