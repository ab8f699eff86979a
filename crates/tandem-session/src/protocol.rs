// protocol.rs — Approval / abandon protocol engine.
//
// Commands ask the server to start, cancel or vote on a merge or abandon
// process for the selected change set. None of them touch the registry on
// success: the authoritative transition arrives as a realtime event, and
// `patch` is what applies it. Quorum is decided server-side; this engine
// only keeps the tallies and reacts to the resulting status events.
//
// Tallies are kept per change set, so a vote for A that arrives while B is
// selected is stored under A instead of being dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tandem_changeset::{ChangeSet, ChangeSetId, ChangeSetStatus, UserId};
use tandem_events::{RealtimeEvent, VoteKind};

use crate::error::SessionError;
use crate::registry::{ChangeSetRegistry, RegistryState};

/// Votes cast on one change set, keyed by voter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VoteTally {
    votes: BTreeMap<UserId, String>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `vote` for `user_id`, replacing any earlier vote.
    ///
    /// Redelivery of the same vote overwrites the same entry.
    pub fn record(&mut self, user_id: UserId, vote: impl Into<String>) {
        self.votes.insert(user_id, vote.into());
    }

    pub fn get(&self, user_id: &UserId) -> Option<&str> {
        self.votes.get(user_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Number of voters whose vote equals `value`, ignoring ASCII case.
    pub fn count(&self, value: &str) -> usize {
        self.votes
            .values()
            .filter(|v| v.eq_ignore_ascii_case(value))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &str)> {
        self.votes.iter().map(|(user, vote)| (user, vote.as_str()))
    }
}

/// What happened when a realtime event was applied to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The record (or its tally) was updated.
    Applied,
    /// The event targets an id the registry has not fetched yet.
    UnknownChangeSet,
    /// The event targets the mainline, whose status never changes.
    Mainline,
    /// Not a status or vote event.
    Ignored,
}

/// Apply one status or vote event to the registry state.
pub(crate) fn patch(
    state: &mut RegistryState,
    event: &RealtimeEvent,
    now: DateTime<Utc>,
) -> PatchOutcome {
    let id = event.change_set_id();
    if matches!(
        event,
        RealtimeEvent::ChangeSetCreated { .. } | RealtimeEvent::ChangeSetWritten { .. }
    ) {
        return PatchOutcome::Ignored;
    }
    if id.is_head() {
        return PatchOutcome::Mainline;
    }

    match event {
        RealtimeEvent::ChangeSetBeginApprovalProcess { user_id, .. } => {
            state.approvals.remove(&id);
            set_status(state, id, ChangeSetStatus::NeedsApproval, |cs| {
                cs.request_merge(user_id.clone(), now)
            })
        }
        RealtimeEvent::ChangeSetCancelApprovalProcess { .. }
        | RealtimeEvent::ChangeSetCancelAbandonProcess { .. } => {
            state.approvals.remove(&id);
            set_status(state, id, ChangeSetStatus::Open, |_| {})
        }
        RealtimeEvent::ChangeSetBeginAbandonProcess { user_id, .. } => {
            state.approvals.remove(&id);
            set_status(state, id, ChangeSetStatus::NeedsAbandonApproval, |cs| {
                cs.request_abandon(user_id.clone(), now)
            })
        }
        RealtimeEvent::ChangeSetApplied { user_id, .. } => {
            let outcome = set_status(state, id, ChangeSetStatus::Applied, |_| {});
            if outcome == PatchOutcome::Applied && state.is_selected(&id) {
                state.post_apply_actor = Some(user_id.clone());
            }
            outcome
        }
        RealtimeEvent::ChangeSetCancelled { user_id, .. } => {
            let outcome = set_status(state, id, ChangeSetStatus::Abandoned, |_| {});
            if outcome == PatchOutcome::Applied && state.is_selected(&id) {
                state.post_abandon_actor = Some(user_id.clone());
            }
            outcome
        }
        RealtimeEvent::ChangeSetMergeVote { user_id, vote, .. }
        | RealtimeEvent::ChangeSetAbandonVote { user_id, vote, .. } => {
            if !state.change_sets.contains_key(&id) {
                return PatchOutcome::UnknownChangeSet;
            }
            state
                .approvals
                .entry(id)
                .or_default()
                .record(user_id.clone(), vote.as_str());
            PatchOutcome::Applied
        }
        RealtimeEvent::ChangeSetCreated { .. } | RealtimeEvent::ChangeSetWritten { .. } => {
            PatchOutcome::Ignored
        }
    }
}

fn set_status(
    state: &mut RegistryState,
    id: ChangeSetId,
    next: ChangeSetStatus,
    stamp: impl FnOnce(&mut ChangeSet),
) -> PatchOutcome {
    let Some(change_set) = state.change_sets.get_mut(&id) else {
        return PatchOutcome::UnknownChangeSet;
    };
    // Events are authoritative; an off-graph step means we missed one.
    if change_set.status != next && !change_set.status.can_transition_to(next) {
        tracing::warn!(
            change_set = %id,
            from = %change_set.status,
            to = %next,
            "applying off-graph status event"
        );
    }
    change_set.status = next;
    stamp(change_set);
    PatchOutcome::Applied
}

impl ChangeSetRegistry {
    // ── Event side ───────────────────────────────────────────────

    /// Apply a status or vote event in place. Unknown ids are a no-op.
    pub fn apply_event(&self, event: &RealtimeEvent) -> PatchOutcome {
        if self.is_torn_down() {
            return PatchOutcome::Ignored;
        }
        let outcome = patch(&mut self.state(), event, Utc::now());
        match outcome {
            PatchOutcome::Applied => tracing::debug!(
                change_set = %event.change_set_id(),
                event = event.event_type(),
                "patched change set"
            ),
            PatchOutcome::UnknownChangeSet => tracing::debug!(
                change_set = %event.change_set_id(),
                event = event.event_type(),
                "event for unfetched change set ignored"
            ),
            PatchOutcome::Mainline => tracing::debug!(
                event = event.event_type(),
                "status event for mainline ignored"
            ),
            PatchOutcome::Ignored => {}
        }
        outcome
    }

    /// Current tally of one change set (empty if nobody voted).
    pub fn approvals(&self, id: &ChangeSetId) -> VoteTally {
        self.state().approvals.get(id).cloned().unwrap_or_default()
    }

    /// Tally of the selected change set.
    pub fn selected_approvals(&self) -> VoteTally {
        let state = self.state();
        state
            .selected_id()
            .and_then(|id| state.approvals.get(&id).cloned())
            .unwrap_or_default()
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Ask collaborators to approve merging the selected change set.
    pub async fn begin_approval(&self) -> Result<(), SessionError> {
        let (target, current) = self.selected_target("sent for approval")?;
        current.check_transition(ChangeSetStatus::NeedsApproval)?;
        self.gateway().begin_approval_process(&target).await?;
        tracing::info!(change_set = %target.change_set_id, "approval process requested");
        Ok(())
    }

    /// Withdraw a running merge vote.
    pub async fn cancel_approval(&self) -> Result<(), SessionError> {
        let (target, current) = self.selected_target("withdrawn from approval")?;
        expect_status(&current, ChangeSetStatus::NeedsApproval)?;
        self.gateway().cancel_approval_process(&target).await?;
        tracing::info!(change_set = %target.change_set_id, "approval process cancel requested");
        Ok(())
    }

    /// Ask collaborators to approve discarding the selected change set.
    pub async fn begin_abandon(&self) -> Result<(), SessionError> {
        let (target, current) = self.selected_target("sent for abandon approval")?;
        current.check_transition(ChangeSetStatus::NeedsAbandonApproval)?;
        self.gateway().begin_abandon_process(&target).await?;
        tracing::info!(change_set = %target.change_set_id, "abandon process requested");
        Ok(())
    }

    /// Withdraw a running abandon vote.
    pub async fn cancel_abandon(&self) -> Result<(), SessionError> {
        let (target, current) = self.selected_target("withdrawn from abandon approval")?;
        expect_status(&current, ChangeSetStatus::NeedsAbandonApproval)?;
        self.gateway().cancel_abandon_process(&target).await?;
        tracing::info!(change_set = %target.change_set_id, "abandon process cancel requested");
        Ok(())
    }

    /// Vote on merging the selected change set.
    pub async fn cast_merge_vote(&self, vote: &str) -> Result<(), SessionError> {
        self.cast_vote(VoteKind::Merge, vote).await
    }

    /// Vote on abandoning the selected change set.
    pub async fn cast_abandon_vote(&self, vote: &str) -> Result<(), SessionError> {
        self.cast_vote(VoteKind::Abandon, vote).await
    }

    async fn cast_vote(&self, kind: VoteKind, vote: &str) -> Result<(), SessionError> {
        let (target, current) = self.selected_target("voted on")?;
        let vote = vote.trim();
        if vote.is_empty() {
            return Err(SessionError::InvalidVote("vote must not be empty".to_string()));
        }
        let running = match kind {
            VoteKind::Merge => ChangeSetStatus::NeedsApproval,
            VoteKind::Abandon => ChangeSetStatus::NeedsAbandonApproval,
        };
        expect_status(&current, running)?;

        self.gateway().cast_vote(&target, kind, vote).await?;
        tracing::debug!(change_set = %target.change_set_id, ?kind, vote, "vote cast");
        Ok(())
    }
}

fn expect_status(current: &ChangeSet, expected: ChangeSetStatus) -> Result<(), SessionError> {
    if current.status != expected {
        return Err(SessionError::UnexpectedStatus {
            change_set_id: current.id,
            status: current.status,
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::tests::fixture;

    fn begin_approval(id: ChangeSetId, user: &str) -> RealtimeEvent {
        RealtimeEvent::ChangeSetBeginApprovalProcess {
            change_set_id: id,
            user_id: UserId::from(user),
        }
    }

    fn merge_vote(id: ChangeSetId, user: &str, vote: &str) -> RealtimeEvent {
        RealtimeEvent::vote(VoteKind::Merge, id, UserId::from(user), vote)
    }

    #[test]
    fn tally_counts_case_insensitively() {
        let mut tally = VoteTally::new();
        tally.record(UserId::from("alice"), "Approve");
        tally.record(UserId::from("bob"), "approve");
        tally.record(UserId::from("carol"), "reject");
        assert_eq!(tally.count("approve"), 2);
        assert_eq!(tally.count("reject"), 1);
        assert_eq!(tally.len(), 3);
    }

    #[test]
    fn repeated_vote_overwrites_entry() {
        let mut tally = VoteTally::new();
        tally.record(UserId::from("alice"), "approve");
        tally.record(UserId::from("alice"), "approve");
        tally.record(UserId::from("alice"), "reject");
        assert_eq!(tally.len(), 1);
        assert_eq!(tally.get(&UserId::from("alice")), Some("reject"));
    }

    #[tokio::test]
    async fn begin_approval_event_stamps_and_clears_tally() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.navigate_to(Some(ids[0]));
        fx.registry
            .state()
            .approvals
            .entry(ids[0])
            .or_default()
            .record(UserId::from("stale"), "approve");

        fx.registry.begin_approval().await.unwrap();
        // The command alone changes nothing locally.
        assert_eq!(
            fx.registry.get(&ids[0]).unwrap().status,
            ChangeSetStatus::Open
        );

        let outcome = fx.registry.apply_event(&begin_approval(ids[0], "alice"));
        assert_eq!(outcome, PatchOutcome::Applied);
        let cs = fx.registry.get(&ids[0]).unwrap();
        assert_eq!(cs.status, ChangeSetStatus::NeedsApproval);
        assert_eq!(cs.merge_requested_by_user_id, Some(UserId::from("alice")));
        assert!(cs.merge_requested_at.is_some());
        assert!(fx.registry.selected_approvals().is_empty());
    }

    #[tokio::test]
    async fn cancel_events_return_to_open() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();

        fx.registry.apply_event(&RealtimeEvent::ChangeSetBeginAbandonProcess {
            change_set_id: ids[0],
            user_id: UserId::from("bob"),
        });
        let cs = fx.registry.get(&ids[0]).unwrap();
        assert_eq!(cs.status, ChangeSetStatus::NeedsAbandonApproval);
        assert_eq!(cs.abandon_requested_by_user_id, Some(UserId::from("bob")));

        fx.registry
            .apply_event(&RealtimeEvent::vote(VoteKind::Abandon, ids[0], UserId::from("bob"), "approve"));
        assert_eq!(fx.registry.approvals(&ids[0]).len(), 1);

        fx.registry
            .apply_event(&RealtimeEvent::ChangeSetCancelAbandonProcess {
                change_set_id: ids[0],
            });
        assert_eq!(
            fx.registry.get(&ids[0]).unwrap().status,
            ChangeSetStatus::Open
        );
        assert!(fx.registry.approvals(&ids[0]).is_empty());
    }

    #[tokio::test]
    async fn applied_event_records_actor_for_selected() {
        let (fx, ids) = fixture(&["Change Set 1", "Change Set 2"]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.navigate_to(Some(ids[0]));

        fx.registry.apply_event(&RealtimeEvent::ChangeSetApplied {
            change_set_id: ids[1],
            user_id: UserId::from("carol"),
        });
        assert_eq!(
            fx.registry.get(&ids[1]).unwrap().status,
            ChangeSetStatus::Applied
        );
        assert!(fx.registry.post_apply_actor().is_none());

        fx.registry.apply_event(&RealtimeEvent::ChangeSetCancelled {
            change_set_id: ids[0],
            user_id: UserId::from("dave"),
        });
        assert_eq!(
            fx.registry.get(&ids[0]).unwrap().status,
            ChangeSetStatus::Abandoned
        );
        assert_eq!(fx.registry.post_abandon_actor(), Some(UserId::from("dave")));
        // Terminal records stay addressable.
        assert_eq!(fx.registry.list_all().len(), 3);
        assert_eq!(fx.registry.list_open().len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_patches_are_ignored() {
        let (fx, _) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        let before = fx.registry.list_all();
        let stranger = ChangeSetId::new_v4();

        assert_eq!(
            fx.registry.apply_event(&begin_approval(stranger, "alice")),
            PatchOutcome::UnknownChangeSet
        );
        assert_eq!(
            fx.registry.apply_event(&merge_vote(stranger, "alice", "approve")),
            PatchOutcome::UnknownChangeSet
        );
        assert_eq!(fx.registry.list_all(), before);
        assert!(fx.registry.approvals(&stranger).is_empty());
    }

    #[tokio::test]
    async fn mainline_status_never_changes() {
        let (fx, _) = fixture(&[]);
        fx.registry.fetch_all().await.unwrap();

        let outcome = fx.registry.apply_event(&RealtimeEvent::ChangeSetApplied {
            change_set_id: ChangeSetId::HEAD,
            user_id: UserId::from("mallory"),
        });
        assert_eq!(outcome, PatchOutcome::Mainline);
        assert_eq!(
            fx.registry.get(&ChangeSetId::HEAD).unwrap().status,
            ChangeSetStatus::Open
        );
    }

    #[tokio::test]
    async fn votes_are_tallied_per_change_set() {
        // A vote for one change set arriving while another is selected is
        // kept under its own id rather than dropped.
        let (fx, ids) = fixture(&["Change Set 1", "Change Set 2"]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.navigate_to(Some(ids[1]));

        fx.registry.apply_event(&merge_vote(ids[0], "alice", "approve"));
        fx.registry.apply_event(&merge_vote(ids[1], "bob", "reject"));

        assert_eq!(
            fx.registry.approvals(&ids[0]).get(&UserId::from("alice")),
            Some("approve")
        );
        let selected = fx.registry.selected_approvals();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.get(&UserId::from("bob")), Some("reject"));
    }

    #[tokio::test]
    async fn duplicate_vote_delivery_is_idempotent() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        let vote = merge_vote(ids[0], "alice", "approve");
        fx.registry.apply_event(&vote);
        fx.registry.apply_event(&vote);
        assert_eq!(fx.registry.approvals(&ids[0]).len(), 1);
    }

    #[tokio::test]
    async fn off_graph_event_is_still_applied() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.apply_event(&begin_approval(ids[0], "alice"));
        fx.registry.apply_event(&RealtimeEvent::ChangeSetCancelled {
            change_set_id: ids[0],
            user_id: UserId::from("bob"),
        });
        assert_eq!(
            fx.registry.get(&ids[0]).unwrap().status,
            ChangeSetStatus::Abandoned
        );
    }

    #[tokio::test]
    async fn commands_require_selection() {
        let (fx, _) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        for result in [
            fx.registry.begin_approval().await,
            fx.registry.cancel_approval().await,
            fx.registry.begin_abandon().await,
            fx.registry.cancel_abandon().await,
            fx.registry.cast_merge_vote("approve").await,
            fx.registry.cast_abandon_vote("").await,
        ] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Precondition);
        }
    }

    #[tokio::test]
    async fn cancel_requires_running_vote() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.navigate_to(Some(ids[0]));

        let err = fx.registry.cancel_approval().await.unwrap_err();
        assert!(matches!(err, SessionError::UnexpectedStatus { .. }));
        let err = fx.registry.cast_abandon_vote("approve").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transition);
        assert_eq!(fx.server.call_count("cancel_approval_process"), 0);
        assert_eq!(fx.server.call_count("cast_vote"), 0);
    }

    #[tokio::test]
    async fn begin_approval_rejected_while_abandon_vote_runs() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.navigate_to(Some(ids[0]));
        fx.registry.apply_event(&RealtimeEvent::ChangeSetBeginAbandonProcess {
            change_set_id: ids[0],
            user_id: UserId::from("bob"),
        });

        let err = fx.registry.begin_approval().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transition);
        assert_eq!(fx.server.call_count("begin_approval_process"), 0);
    }

    #[tokio::test]
    async fn vote_is_sent_when_process_runs() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.navigate_to(Some(ids[0]));
        fx.registry.begin_approval().await.unwrap();
        fx.registry.apply_event(&begin_approval(ids[0], "alice"));

        fx.registry.cast_merge_vote("approve").await.unwrap();
        assert_eq!(fx.server.call_count("cast_vote"), 1);

        let err = fx.registry.cast_merge_vote("  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn vote_commands_reject_mainline() {
        let (fx, _) = fixture(&[]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.navigate(Some("head"));
        let err = fx.registry.begin_abandon().await.unwrap_err();
        assert!(matches!(err, SessionError::MainlineImmutable { .. }));
        assert_eq!(fx.server.call_count("begin_abandon_process"), 0);
    }
}
