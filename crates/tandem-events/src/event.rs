// event.rs — Realtime events pushed by the server.
//
// Every event targets one change set and most carry the acting user. The
// `kind` tag is the contract with the bus: a frame whose tag is not listed
// here fails to decode, and the session core treats that as protocol drift.

use serde::{Deserialize, Serialize};
use tandem_changeset::{ChangeSetId, UserId};

use crate::error::EventError;

/// Which vote a collaborator is casting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// Vote on merging the change set into the mainline.
    Merge,
    /// Vote on discarding the change set.
    Abandon,
}

/// Events delivered on a workspace (or change set) topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RealtimeEvent {
    /// A change set was created; list membership changed.
    ChangeSetCreated { change_set_id: ChangeSetId },

    /// A change set was abandoned.
    ChangeSetCancelled {
        change_set_id: ChangeSetId,
        user_id: UserId,
    },

    /// A change set was merged into the mainline.
    ChangeSetApplied {
        change_set_id: ChangeSetId,
        user_id: UserId,
    },

    /// A merge vote started.
    ChangeSetBeginApprovalProcess {
        change_set_id: ChangeSetId,
        user_id: UserId,
    },

    /// A merge vote was cancelled.
    ChangeSetCancelApprovalProcess { change_set_id: ChangeSetId },

    /// An abandon vote started.
    ChangeSetBeginAbandonProcess {
        change_set_id: ChangeSetId,
        user_id: UserId,
    },

    /// An abandon vote was cancelled.
    ChangeSetCancelAbandonProcess { change_set_id: ChangeSetId },

    /// Something inside the change set was written. Arrives in bursts.
    ChangeSetWritten { change_set_id: ChangeSetId },

    /// A collaborator voted on a merge.
    ChangeSetMergeVote {
        change_set_id: ChangeSetId,
        user_id: UserId,
        vote: String,
    },

    /// A collaborator voted on an abandon.
    ChangeSetAbandonVote {
        change_set_id: ChangeSetId,
        user_id: UserId,
        vote: String,
    },
}

impl RealtimeEvent {
    /// Get the event type name as it appears on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            RealtimeEvent::ChangeSetCreated { .. } => "ChangeSetCreated",
            RealtimeEvent::ChangeSetCancelled { .. } => "ChangeSetCancelled",
            RealtimeEvent::ChangeSetApplied { .. } => "ChangeSetApplied",
            RealtimeEvent::ChangeSetBeginApprovalProcess { .. } => "ChangeSetBeginApprovalProcess",
            RealtimeEvent::ChangeSetCancelApprovalProcess { .. } => {
                "ChangeSetCancelApprovalProcess"
            }
            RealtimeEvent::ChangeSetBeginAbandonProcess { .. } => "ChangeSetBeginAbandonProcess",
            RealtimeEvent::ChangeSetCancelAbandonProcess { .. } => "ChangeSetCancelAbandonProcess",
            RealtimeEvent::ChangeSetWritten { .. } => "ChangeSetWritten",
            RealtimeEvent::ChangeSetMergeVote { .. } => "ChangeSetMergeVote",
            RealtimeEvent::ChangeSetAbandonVote { .. } => "ChangeSetAbandonVote",
        }
    }

    /// The change set this event targets.
    pub fn change_set_id(&self) -> ChangeSetId {
        match self {
            RealtimeEvent::ChangeSetCreated { change_set_id }
            | RealtimeEvent::ChangeSetCancelled { change_set_id, .. }
            | RealtimeEvent::ChangeSetApplied { change_set_id, .. }
            | RealtimeEvent::ChangeSetBeginApprovalProcess { change_set_id, .. }
            | RealtimeEvent::ChangeSetCancelApprovalProcess { change_set_id }
            | RealtimeEvent::ChangeSetBeginAbandonProcess { change_set_id, .. }
            | RealtimeEvent::ChangeSetCancelAbandonProcess { change_set_id }
            | RealtimeEvent::ChangeSetWritten { change_set_id }
            | RealtimeEvent::ChangeSetMergeVote { change_set_id, .. }
            | RealtimeEvent::ChangeSetAbandonVote { change_set_id, .. } => *change_set_id,
        }
    }

    /// The acting user, for events that carry one.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            RealtimeEvent::ChangeSetCancelled { user_id, .. }
            | RealtimeEvent::ChangeSetApplied { user_id, .. }
            | RealtimeEvent::ChangeSetBeginApprovalProcess { user_id, .. }
            | RealtimeEvent::ChangeSetBeginAbandonProcess { user_id, .. }
            | RealtimeEvent::ChangeSetMergeVote { user_id, .. }
            | RealtimeEvent::ChangeSetAbandonVote { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    /// Helper to create a vote event of the given kind.
    pub fn vote(
        kind: VoteKind,
        change_set_id: ChangeSetId,
        user_id: UserId,
        vote: impl Into<String>,
    ) -> Self {
        let vote = vote.into();
        match kind {
            VoteKind::Merge => RealtimeEvent::ChangeSetMergeVote {
                change_set_id,
                user_id,
                vote,
            },
            VoteKind::Abandon => RealtimeEvent::ChangeSetAbandonVote {
                change_set_id,
                user_id,
                vote,
            },
        }
    }

    /// Decode one JSON frame from the bus.
    pub fn decode(frame: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Encode as one JSON frame.
    pub fn encode(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_carries_kind_tag() {
        let id = ChangeSetId::new_v4();
        let event = RealtimeEvent::ChangeSetWritten { change_set_id: id };
        let frame = event.encode().unwrap();
        assert!(frame.contains("\"kind\":\"ChangeSetWritten\""));
        assert_eq!(RealtimeEvent::decode(&frame).unwrap(), event);
    }

    #[test]
    fn decodes_vote_frame() {
        let id = ChangeSetId::new_v4();
        let frame = format!(
            r#"{{"kind":"ChangeSetMergeVote","change_set_id":"{}","user_id":"bob","vote":"approve"}}"#,
            id
        );
        let event = RealtimeEvent::decode(&frame).unwrap();
        assert_eq!(
            event,
            RealtimeEvent::vote(VoteKind::Merge, id, UserId::from("bob"), "approve")
        );
        assert_eq!(event.user_id(), Some(&UserId::from("bob")));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let frame = format!(
            r#"{{"kind":"ChangeSetRenamed","change_set_id":"{}"}}"#,
            ChangeSetId::new_v4()
        );
        assert!(matches!(
            RealtimeEvent::decode(&frame),
            Err(EventError::Malformed(_))
        ));
    }

    #[test]
    fn missing_payload_field_is_rejected() {
        let frame = format!(
            r#"{{"kind":"ChangeSetApplied","change_set_id":"{}"}}"#,
            ChangeSetId::new_v4()
        );
        assert!(RealtimeEvent::decode(&frame).is_err());
    }

    #[test]
    fn event_type_names_match_tags() {
        let id = ChangeSetId::new_v4();
        let events = [
            RealtimeEvent::ChangeSetCreated { change_set_id: id },
            RealtimeEvent::ChangeSetCancelApprovalProcess { change_set_id: id },
            RealtimeEvent::vote(VoteKind::Abandon, id, UserId::from("u"), "approve"),
        ];
        for event in events {
            let frame = event.encode().unwrap();
            assert!(frame.contains(&format!("\"kind\":\"{}\"", event.event_type())));
            assert_eq!(event.change_set_id(), id);
        }
    }

    #[test]
    fn cancel_events_carry_no_user() {
        let event = RealtimeEvent::ChangeSetCancelAbandonProcess {
            change_set_id: ChangeSetId::new_v4(),
        };
        assert!(event.user_id().is_none());
    }
}
