//! In-process change set authority.
//!
//! [`LocalServer`] plays the part of the remote side: it holds change sets
//! per workspace, assigns ids, decides quorum and, when attached to a
//! [`MemoryBus`], publishes the realtime events the real server would.
//! [`LocalGateway`] is a [`CommandGateway`] bound to one acting user.
//!
//! Used by the integration tests and the `tandem` CLI. Events are published
//! before a command returns, so callers see the same "event before response"
//! interleaving the real transport can produce.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use tandem_changeset::{ChangeSet, ChangeSetId, ChangeSetStatus, UserId, WorkspaceId};
use tandem_events::{MemoryBus, RealtimeEvent, Topic, VoteKind};

use crate::gateway::{self, CommandGateway, GatewayError, Visibility};
use crate::protocol::VoteTally;

/// Vote value that counts towards quorum.
pub const APPROVE: &str = "approve";

#[derive(Default)]
struct ServerState {
    workspaces: HashMap<WorkspaceId, IndexMap<ChangeSetId, ChangeSet>>,
    votes: HashMap<(ChangeSetId, VoteKind), VoteTally>,
    calls: HashMap<&'static str, usize>,
    fail_next: Option<String>,
}

impl ServerState {
    fn change_set_mut(
        &mut self,
        operation: &'static str,
        target: &Visibility,
    ) -> gateway::Result<&mut ChangeSet> {
        if target.change_set_id.is_head() {
            return Err(GatewayError::new(operation, "the mainline cannot be modified"));
        }
        self.workspaces
            .get_mut(&target.workspace_id)
            .and_then(|sets| sets.get_mut(&target.change_set_id))
            .ok_or_else(|| {
                GatewayError::new(
                    operation,
                    format!("change set {} not found", target.change_set_id),
                )
            })
    }
}

/// The in-process authority.
pub struct LocalServer {
    state: Mutex<ServerState>,
    bus: Option<Arc<MemoryBus>>,
    merge_quorum: usize,
    abandon_quorum: usize,
}

impl Default for LocalServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalServer {
    /// A server without a bus and a quorum of one approval.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            bus: None,
            merge_quorum: 1,
            abandon_quorum: 1,
        }
    }

    /// Publish realtime events on `bus`.
    pub fn with_bus(mut self, bus: Arc<MemoryBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Number of `"approve"` votes that applies or abandons a change set.
    pub fn with_quorum(mut self, merge: usize, abandon: usize) -> Self {
        self.merge_quorum = merge.max(1);
        self.abandon_quorum = abandon.max(1);
        self
    }

    /// A gateway acting as `user_id`.
    pub fn gateway(self: &Arc<Self>, user_id: UserId) -> LocalGateway {
        LocalGateway {
            server: self.clone(),
            user_id,
        }
    }

    /// Add change sets to a workspace without publishing anything.
    pub fn seed(&self, workspace_id: WorkspaceId, change_sets: impl IntoIterator<Item = ChangeSet>) {
        let mut state = self.lock();
        let sets = state.workspaces.entry(workspace_id).or_default();
        for change_set in change_sets {
            sets.insert(change_set.id, change_set);
        }
    }

    /// Make the next gateway call fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    /// How many times `operation` was called, failures included.
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Server-side view of one change set.
    pub fn change_set(&self, workspace_id: &WorkspaceId, id: &ChangeSetId) -> Option<ChangeSet> {
        self.lock()
            .workspaces
            .get(workspace_id)
            .and_then(|sets| sets.get(id))
            .cloned()
    }

    /// Simulate an edit inside a change set: publishes `ChangeSetWritten`.
    pub async fn record_write(&self, workspace_id: WorkspaceId, change_set_id: ChangeSetId) {
        self.publish(
            workspace_id,
            vec![RealtimeEvent::ChangeSetWritten { change_set_id }],
        )
        .await;
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and honor an injected failure.
    fn enter(&self, operation: &'static str) -> gateway::Result<MutexGuard<'_, ServerState>> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_default() += 1;
        if let Some(message) = state.fail_next.take() {
            tracing::debug!(operation, "injected failure");
            return Err(GatewayError::new(operation, message));
        }
        Ok(state)
    }

    async fn publish(&self, workspace_id: WorkspaceId, events: Vec<RealtimeEvent>) {
        let Some(bus) = &self.bus else {
            return;
        };
        let topic = Topic::Workspace(workspace_id);
        for event in events {
            bus.publish(&topic, event).await;
        }
    }

    fn create(
        &self,
        workspace_id: WorkspaceId,
        name: &str,
    ) -> gateway::Result<(ChangeSet, Vec<RealtimeEvent>)> {
        const OP: &str = "create_change_set";
        let mut state = self.enter(OP)?;
        if name.trim().is_empty() {
            return Err(GatewayError::new(OP, "name must not be empty"));
        }
        let created = ChangeSet::new(ChangeSetId::new_v4(), name);
        state
            .workspaces
            .entry(workspace_id)
            .or_default()
            .insert(created.id, created.clone());
        let events = vec![RealtimeEvent::ChangeSetCreated {
            change_set_id: created.id,
        }];
        Ok((created, events))
    }

    fn apply(
        &self,
        target: &Visibility,
        user_id: &UserId,
    ) -> gateway::Result<(ChangeSet, Vec<RealtimeEvent>)> {
        const OP: &str = "apply_change_set";
        let mut state = self.enter(OP)?;
        let change_set = state.change_set_mut(OP, target)?;
        transition(OP, change_set, ChangeSetStatus::Applied)?;
        let applied = change_set.clone();
        state.votes.remove(&(target.change_set_id, VoteKind::Merge));
        let events = vec![RealtimeEvent::ChangeSetApplied {
            change_set_id: target.change_set_id,
            user_id: user_id.clone(),
        }];
        Ok((applied, events))
    }

    fn abandon(&self, target: &Visibility, user_id: &UserId) -> gateway::Result<Vec<RealtimeEvent>> {
        const OP: &str = "abandon_change_set";
        let mut state = self.enter(OP)?;
        let change_set = state.change_set_mut(OP, target)?;
        transition(OP, change_set, ChangeSetStatus::Abandoned)?;
        state.votes.remove(&(target.change_set_id, VoteKind::Abandon));
        Ok(vec![RealtimeEvent::ChangeSetCancelled {
            change_set_id: target.change_set_id,
            user_id: user_id.clone(),
        }])
    }

    fn begin_process(
        &self,
        operation: &'static str,
        target: &Visibility,
        user_id: &UserId,
        kind: VoteKind,
    ) -> gateway::Result<Vec<RealtimeEvent>> {
        let mut state = self.enter(operation)?;
        let change_set = state.change_set_mut(operation, target)?;
        let now = Utc::now();
        let event = match kind {
            VoteKind::Merge => {
                change_set
                    .check_transition(ChangeSetStatus::NeedsApproval)
                    .map_err(|e| GatewayError::new(operation, e.to_string()))?;
                change_set.request_merge(user_id.clone(), now);
                RealtimeEvent::ChangeSetBeginApprovalProcess {
                    change_set_id: target.change_set_id,
                    user_id: user_id.clone(),
                }
            }
            VoteKind::Abandon => {
                change_set
                    .check_transition(ChangeSetStatus::NeedsAbandonApproval)
                    .map_err(|e| GatewayError::new(operation, e.to_string()))?;
                change_set.request_abandon(user_id.clone(), now);
                RealtimeEvent::ChangeSetBeginAbandonProcess {
                    change_set_id: target.change_set_id,
                    user_id: user_id.clone(),
                }
            }
        };
        state.votes.remove(&(target.change_set_id, kind));
        Ok(vec![event])
    }

    fn cancel_process(
        &self,
        operation: &'static str,
        target: &Visibility,
        kind: VoteKind,
    ) -> gateway::Result<Vec<RealtimeEvent>> {
        let mut state = self.enter(operation)?;
        let change_set = state.change_set_mut(operation, target)?;
        if change_set.status != running_status(kind) {
            return Err(GatewayError::new(
                operation,
                format!("no {:?} vote is running", kind).to_lowercase(),
            ));
        }
        change_set.status = ChangeSetStatus::Open;
        state.votes.remove(&(target.change_set_id, kind));
        let event = match kind {
            VoteKind::Merge => RealtimeEvent::ChangeSetCancelApprovalProcess {
                change_set_id: target.change_set_id,
            },
            VoteKind::Abandon => RealtimeEvent::ChangeSetCancelAbandonProcess {
                change_set_id: target.change_set_id,
            },
        };
        Ok(vec![event])
    }

    fn vote(
        &self,
        target: &Visibility,
        user_id: &UserId,
        kind: VoteKind,
        vote: &str,
    ) -> gateway::Result<Vec<RealtimeEvent>> {
        const OP: &str = "cast_vote";
        let mut state = self.enter(OP)?;
        let change_set = state.change_set_mut(OP, target)?;
        if change_set.status != running_status(kind) {
            return Err(GatewayError::new(
                OP,
                format!("change set is {}, no vote is running", change_set.status),
            ));
        }

        let tally = state
            .votes
            .entry((target.change_set_id, kind))
            .or_default();
        tally.record(user_id.clone(), vote);
        let approvals = tally.count(APPROVE);

        let mut events = vec![RealtimeEvent::vote(
            kind,
            target.change_set_id,
            user_id.clone(),
            vote,
        )];

        let quorum = match kind {
            VoteKind::Merge => self.merge_quorum,
            VoteKind::Abandon => self.abandon_quorum,
        };
        if approvals >= quorum {
            let change_set = state.change_set_mut(OP, target)?;
            match kind {
                VoteKind::Merge => {
                    change_set.status = ChangeSetStatus::Applied;
                    events.push(RealtimeEvent::ChangeSetApplied {
                        change_set_id: target.change_set_id,
                        user_id: user_id.clone(),
                    });
                }
                VoteKind::Abandon => {
                    change_set.status = ChangeSetStatus::Abandoned;
                    events.push(RealtimeEvent::ChangeSetCancelled {
                        change_set_id: target.change_set_id,
                        user_id: user_id.clone(),
                    });
                }
            }
            state.votes.remove(&(target.change_set_id, kind));
            tracing::info!(change_set = %target.change_set_id, ?kind, approvals, "quorum reached");
        }
        Ok(events)
    }
}

fn running_status(kind: VoteKind) -> ChangeSetStatus {
    match kind {
        VoteKind::Merge => ChangeSetStatus::NeedsApproval,
        VoteKind::Abandon => ChangeSetStatus::NeedsAbandonApproval,
    }
}

fn transition(
    operation: &'static str,
    change_set: &mut ChangeSet,
    next: ChangeSetStatus,
) -> gateway::Result<()> {
    change_set
        .transition(next)
        .map_err(|e| GatewayError::new(operation, e.to_string()))
}

/// [`CommandGateway`] backed by a [`LocalServer`], acting as one user.
#[derive(Clone)]
pub struct LocalGateway {
    server: Arc<LocalServer>,
    user_id: UserId,
}

impl LocalGateway {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn server(&self) -> &Arc<LocalServer> {
        &self.server
    }
}

#[async_trait]
impl CommandGateway for LocalGateway {
    async fn list_open_change_sets(&self, workspace_id: &WorkspaceId) -> gateway::Result<Vec<ChangeSet>> {
        let state = self.server.enter("list_open_change_sets")?;
        Ok(state
            .workspaces
            .get(workspace_id)
            .map(|sets| {
                sets.values()
                    .filter(|cs| cs.status.is_open())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_change_set(
        &self,
        workspace_id: &WorkspaceId,
        name: &str,
    ) -> gateway::Result<ChangeSet> {
        let (created, events) = self.server.create(*workspace_id, name)?;
        self.server.publish(*workspace_id, events).await;
        Ok(created)
    }

    async fn abandon_change_set(&self, target: &Visibility) -> gateway::Result<()> {
        let events = self.server.abandon(target, &self.user_id)?;
        self.server.publish(target.workspace_id, events).await;
        Ok(())
    }

    async fn apply_change_set(&self, target: &Visibility) -> gateway::Result<ChangeSet> {
        let (applied, events) = self.server.apply(target, &self.user_id)?;
        self.server.publish(target.workspace_id, events).await;
        Ok(applied)
    }

    async fn cast_vote(&self, target: &Visibility, kind: VoteKind, vote: &str) -> gateway::Result<()> {
        let events = self.server.vote(target, &self.user_id, kind, vote)?;
        self.server.publish(target.workspace_id, events).await;
        Ok(())
    }

    async fn begin_approval_process(&self, target: &Visibility) -> gateway::Result<()> {
        let events =
            self.server
                .begin_process("begin_approval_process", target, &self.user_id, VoteKind::Merge)?;
        self.server.publish(target.workspace_id, events).await;
        Ok(())
    }

    async fn cancel_approval_process(&self, target: &Visibility) -> gateway::Result<()> {
        let events = self
            .server
            .cancel_process("cancel_approval_process", target, VoteKind::Merge)?;
        self.server.publish(target.workspace_id, events).await;
        Ok(())
    }

    async fn begin_abandon_process(&self, target: &Visibility) -> gateway::Result<()> {
        let events = self.server.begin_process(
            "begin_abandon_process",
            target,
            &self.user_id,
            VoteKind::Abandon,
        )?;
        self.server.publish(target.workspace_id, events).await;
        Ok(())
    }

    async fn cancel_abandon_process(&self, target: &Visibility) -> gateway::Result<()> {
        let events = self
            .server
            .cancel_process("cancel_abandon_process", target, VoteKind::Abandon)?;
        self.server.publish(target.workspace_id, events).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_events::{EventBus, EventHandler};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<RealtimeEvent>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &RealtimeEvent) {
            self.seen.lock().unwrap().push(event.clone());
        }
    }

    fn setup(quorum: usize) -> (Arc<LocalServer>, Arc<Recorder>, WorkspaceId, ChangeSetId) {
        let bus = Arc::new(MemoryBus::new());
        let server = Arc::new(LocalServer::new().with_bus(bus.clone()).with_quorum(quorum, quorum));
        let workspace_id = WorkspaceId::new_v4();
        let change_set = ChangeSet::new(ChangeSetId::new_v4(), "Change Set 1");
        let id = change_set.id;
        server.seed(workspace_id, [change_set]);
        let recorder = Arc::new(Recorder::default());
        bus.subscribe("recorder", Topic::Workspace(workspace_id), recorder.clone());
        (server, recorder, workspace_id, id)
    }

    fn kinds(recorder: &Recorder) -> Vec<&'static str> {
        recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type())
            .collect()
    }

    #[tokio::test]
    async fn list_excludes_terminal_change_sets() {
        let (server, _, ws, id) = setup(1);
        let gateway = server.gateway(UserId::from("alice"));
        gateway
            .apply_change_set(&Visibility::new(ws, id))
            .await
            .unwrap();
        assert!(gateway.list_open_change_sets(&ws).await.unwrap().is_empty());
        assert_eq!(
            server.change_set(&ws, &id).unwrap().status,
            ChangeSetStatus::Applied
        );
    }

    #[tokio::test]
    async fn create_publishes_created_event() {
        let (server, recorder, ws, _) = setup(1);
        let gateway = server.gateway(UserId::from("alice"));
        let created = gateway.create_change_set(&ws, "Change Set 2").await.unwrap();
        assert_eq!(created.status, ChangeSetStatus::Open);
        assert_eq!(kinds(&recorder), vec!["ChangeSetCreated"]);
    }

    #[tokio::test]
    async fn quorum_applies_after_enough_approvals() {
        let (server, recorder, ws, id) = setup(2);
        let target = Visibility::new(ws, id);
        let alice = server.gateway(UserId::from("alice"));
        let bob = server.gateway(UserId::from("bob"));

        alice.begin_approval_process(&target).await.unwrap();
        alice.cast_vote(&target, VoteKind::Merge, "approve").await.unwrap();
        assert_eq!(
            server.change_set(&ws, &id).unwrap().status,
            ChangeSetStatus::NeedsApproval
        );
        bob.cast_vote(&target, VoteKind::Merge, "Approve").await.unwrap();

        assert_eq!(
            server.change_set(&ws, &id).unwrap().status,
            ChangeSetStatus::Applied
        );
        assert_eq!(
            kinds(&recorder),
            vec![
                "ChangeSetBeginApprovalProcess",
                "ChangeSetMergeVote",
                "ChangeSetMergeVote",
                "ChangeSetApplied",
            ]
        );
    }

    #[tokio::test]
    async fn repeated_vote_counts_once() {
        let (server, _, ws, id) = setup(2);
        let target = Visibility::new(ws, id);
        let alice = server.gateway(UserId::from("alice"));
        alice.begin_approval_process(&target).await.unwrap();
        alice.cast_vote(&target, VoteKind::Merge, "approve").await.unwrap();
        alice.cast_vote(&target, VoteKind::Merge, "APPROVE").await.unwrap();
        assert_eq!(
            server.change_set(&ws, &id).unwrap().status,
            ChangeSetStatus::NeedsApproval
        );
    }

    #[tokio::test]
    async fn rejections_do_not_reach_quorum() {
        let (server, _, ws, id) = setup(1);
        let target = Visibility::new(ws, id);
        let alice = server.gateway(UserId::from("alice"));
        alice.begin_abandon_process(&target).await.unwrap();
        alice.cast_vote(&target, VoteKind::Abandon, "reject").await.unwrap();
        assert_eq!(
            server.change_set(&ws, &id).unwrap().status,
            ChangeSetStatus::NeedsAbandonApproval
        );

        alice.cancel_abandon_process(&target).await.unwrap();
        assert_eq!(
            server.change_set(&ws, &id).unwrap().status,
            ChangeSetStatus::Open
        );
    }

    #[tokio::test]
    async fn vote_without_process_is_rejected() {
        let (server, _, ws, id) = setup(1);
        let err = server
            .gateway(UserId::from("alice"))
            .cast_vote(&Visibility::new(ws, id), VoteKind::Merge, "approve")
            .await
            .unwrap_err();
        assert_eq!(err.operation, "cast_vote");
    }

    #[tokio::test]
    async fn injected_failure_hits_next_call_only() {
        let (server, recorder, ws, _) = setup(1);
        let gateway = server.gateway(UserId::from("alice"));
        server.fail_next("offline");

        let err = gateway.create_change_set(&ws, "Change Set 2").await.unwrap_err();
        assert_eq!(err, GatewayError::new("create_change_set", "offline"));
        assert!(kinds(&recorder).is_empty());

        gateway.create_change_set(&ws, "Change Set 2").await.unwrap();
        assert_eq!(server.call_count("create_change_set"), 2);
    }

    #[tokio::test]
    async fn mainline_cannot_be_abandoned() {
        let (server, _, ws, _) = setup(1);
        let err = server
            .gateway(UserId::from("alice"))
            .abandon_change_set(&Visibility::new(ws, ChangeSetId::HEAD))
            .await
            .unwrap_err();
        assert!(err.message.contains("mainline"));
    }
}
