// registry.rs — ChangeSetRegistry: the authoritative local view of a workspace.
//
// The registry maps change set ids to records, with the synthetic mainline
// record always first. It is seeded by a full fetch, replaced wholesale by
// every later full fetch, and patched in place by realtime events.
//
// Concurrency: there is one logical thread of control per workspace, but
// command responses and realtime events interleave. Every mutation is a
// short critical section under one mutex that is never held across an
// await, so an event about a mutation may be reconciled before the response
// of the command that caused it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tandem_changeset::{ChangeSet, ChangeSetId, ChangeSetStatus, UserId, WorkspaceId};

use crate::error::SessionError;
use crate::gateway::{self, CommandGateway, Visibility};
use crate::latch::CreationLatch;
use crate::persistence::{self, KeyValueStore};
use crate::protocol::VoteTally;

/// Mutable registry state. Only touched under the registry mutex.
#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    /// Insertion ordered: mainline first, then server order of the last fetch.
    pub(crate) change_sets: IndexMap<ChangeSetId, ChangeSet>,
    /// Last write marker per id. Never decreases within a session.
    pub(crate) written_at: HashMap<ChangeSetId, DateTime<Utc>>,
    pub(crate) post_apply_actor: Option<UserId>,
    pub(crate) post_abandon_actor: Option<UserId>,
    /// Vote tallies, namespaced by change set.
    pub(crate) approvals: HashMap<ChangeSetId, VoteTally>,
    /// Navigation-provided id; the selection is this id if it is known.
    pub(crate) route: Option<ChangeSetId>,
    pub(crate) last_persisted: Option<ChangeSetId>,
    pub(crate) populated: bool,
    fetches_issued: u64,
    fetch_applied: u64,
}

impl RegistryState {
    pub(crate) fn selected_id(&self) -> Option<ChangeSetId> {
        self.route.filter(|id| self.change_sets.contains_key(id))
    }

    pub(crate) fn is_selected(&self, id: &ChangeSetId) -> bool {
        self.selected_id().as_ref() == Some(id)
    }

    pub(crate) fn mark_written(&mut self, id: ChangeSetId, now: DateTime<Utc>) {
        self.written_at
            .entry(id)
            .and_modify(|at| {
                if now > *at {
                    *at = now;
                }
            })
            .or_insert(now);
    }
}

struct RegistryInner {
    workspace_id: WorkspaceId,
    gateway: Arc<dyn CommandGateway>,
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    state: Mutex<RegistryState>,
    latch: CreationLatch,
    torn_down: AtomicBool,
}

/// Workspace-scoped change set registry.
///
/// Cheap to clone: all clones share one registry. Construct one per active
/// workspace context; [`WorkspaceSession`](crate::WorkspaceSession) owns the
/// init (first fetch) and teardown.
#[derive(Clone)]
pub struct ChangeSetRegistry {
    inner: Arc<RegistryInner>,
}

impl ChangeSetRegistry {
    /// Create an empty registry. Nothing is fetched until [`fetch_all`](Self::fetch_all).
    pub fn new(
        workspace_id: WorkspaceId,
        gateway: Arc<dyn CommandGateway>,
        store: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                workspace_id,
                gateway,
                store,
                namespace: namespace.into(),
                state: Mutex::new(RegistryState::default()),
                latch: CreationLatch::new(),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.inner.workspace_id
    }

    // ── Derived views ────────────────────────────────────────────

    /// Every known record, mainline first, then server order.
    pub fn list_all(&self) -> Vec<ChangeSet> {
        self.state().change_sets.values().cloned().collect()
    }

    /// Records whose status is Open, NeedsApproval or NeedsAbandonApproval.
    ///
    /// Terminal records stay in the registry (and in [`list_all`](Self::list_all))
    /// until the next full fetch.
    pub fn list_open(&self) -> Vec<ChangeSet> {
        self.state()
            .change_sets
            .values()
            .filter(|cs| cs.status.is_open())
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &ChangeSetId) -> Option<ChangeSet> {
        self.state().change_sets.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().change_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().change_sets.is_empty()
    }

    /// Whether at least one full fetch has succeeded.
    pub fn is_populated(&self) -> bool {
        self.state().populated
    }

    /// Freshness marker for a change set (last `ChangeSetWritten` handled).
    pub fn written_at(&self, id: &ChangeSetId) -> Option<DateTime<Utc>> {
        self.state().written_at.get(id).copied()
    }

    /// Who applied the selected change set, for a one-shot notice.
    pub fn post_apply_actor(&self) -> Option<UserId> {
        self.state().post_apply_actor.clone()
    }

    /// Who abandoned the selected change set, for a one-shot notice.
    pub fn post_abandon_actor(&self) -> Option<UserId> {
        self.state().post_abandon_actor.clone()
    }

    pub fn selected_id(&self) -> Option<ChangeSetId> {
        self.state().selected_id()
    }

    pub fn selected(&self) -> Option<ChangeSet> {
        let state = self.state();
        state
            .selected_id()
            .and_then(|id| state.change_sets.get(&id).cloned())
    }

    pub fn head_selected(&self) -> bool {
        self.selected_id().is_some_and(|id| id.is_head())
    }

    pub fn selected_last_written_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state();
        state
            .selected_id()
            .and_then(|id| state.written_at.get(&id).copied())
    }

    /// Whether an implicit mainline → branch creation is outstanding.
    pub fn is_creating_change_set(&self) -> bool {
        self.inner.latch.is_held()
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    // ── Navigation ───────────────────────────────────────────────

    /// Follow a navigation route token (`"head"` or a change set id).
    pub fn navigate(&self, route: Option<&str>) {
        self.navigate_to(route.and_then(ChangeSetId::from_route));
    }

    /// Set the navigation-provided change set id.
    pub fn navigate_to(&self, target: Option<ChangeSetId>) {
        if self.is_torn_down() {
            return;
        }
        {
            let mut state = self.state();
            let before = state.selected_id();
            state.route = target;
            let after = state.selected_id();
            if before != after {
                state.post_apply_actor = None;
                state.post_abandon_actor = None;
                tracing::debug!(
                    workspace = %self.inner.workspace_id,
                    from = ?before,
                    to = ?after,
                    "selected change set changed"
                );
            }
        }
        self.persist_selection();
    }

    /// Navigate to `id`, fetching first if the registry has not seen it yet.
    ///
    /// A redirect to a just-created change set can arrive before the local
    /// list has been refreshed.
    pub async fn activate(&self, id: ChangeSetId) -> Result<(), SessionError> {
        self.ensure_live()?;
        let known = self.state().change_sets.contains_key(&id);
        if !known {
            self.fetch_all().await?;
        }
        self.navigate_to(Some(id));
        Ok(())
    }

    // ── Lifecycle commands ───────────────────────────────────────

    /// Replace the registry with the server's open change sets plus the mainline.
    ///
    /// Locally applied patches are overwritten by this snapshot. A response
    /// older than one already applied is discarded.
    pub async fn fetch_all(&self) -> Result<(), SessionError> {
        self.ensure_live()?;
        let sequence = {
            let mut state = self.state();
            state.fetches_issued += 1;
            state.fetches_issued
        };

        let listed = self
            .inner
            .gateway
            .list_open_change_sets(&self.inner.workspace_id)
            .await?;
        self.ensure_live()?;

        {
            let mut state = self.state();
            if sequence < state.fetch_applied {
                tracing::debug!(sequence, "discarding stale change set list");
                return Ok(());
            }
            state.fetch_applied = sequence;

            let mut change_sets = IndexMap::with_capacity(listed.len() + 1);
            change_sets.insert(ChangeSetId::HEAD, ChangeSet::head());
            for change_set in listed {
                if change_set.is_head() {
                    tracing::warn!("server listed the mainline id, ignoring record");
                    continue;
                }
                change_sets.insert(change_set.id, change_set);
            }
            tracing::debug!(
                workspace = %self.inner.workspace_id,
                count = change_sets.len(),
                "change sets refreshed"
            );
            state.approvals.retain(|id, _| change_sets.contains_key(id));
            state.change_sets = change_sets;
            state.populated = true;
        }
        self.persist_selection();
        Ok(())
    }

    /// Create a change set named `name`.
    pub async fn create(&self, name: &str) -> Result<ChangeSet, SessionError> {
        self.ensure_live()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidName(
                "name must not be empty".to_string(),
            ));
        }

        let created = self
            .inner
            .gateway
            .create_change_set(&self.inner.workspace_id, name)
            .await?;
        if created.is_head() {
            return Err(gateway::GatewayError::new(
                "create_change_set",
                "server returned the mainline id for a new change set",
            )
            .into());
        }
        self.ensure_live()?;

        tracing::info!(change_set = %created.id, name = %created.name, "change set created");
        self.state()
            .change_sets
            .insert(created.id, created.clone());
        self.persist_selection();
        Ok(created)
    }

    /// Apply the selected change set; the returned record replaces the local one.
    pub async fn apply(&self) -> Result<ChangeSet, SessionError> {
        let (target, current) = self.selected_target("applied")?;
        current.check_transition(ChangeSetStatus::Applied)?;

        let applied = self.inner.gateway.apply_change_set(&target).await?;
        if applied.id != target.change_set_id {
            return Err(gateway::GatewayError::new(
                "apply_change_set",
                format!(
                    "server returned change set {} for {}",
                    applied.id, target.change_set_id
                ),
            )
            .into());
        }
        self.ensure_live()?;

        tracing::info!(change_set = %applied.id, status = %applied.status, "change set applied");
        self.state()
            .change_sets
            .insert(applied.id, applied.clone());
        self.persist_selection();
        Ok(applied)
    }

    /// Abandon the selected change set.
    ///
    /// Success does not touch the registry: the status flips only when the
    /// `ChangeSetCancelled` event arrives.
    pub async fn abandon(&self) -> Result<(), SessionError> {
        let (target, current) = self.selected_target("abandoned")?;
        current.check_transition(ChangeSetStatus::Abandoned)?;

        self.inner.gateway.abandon_change_set(&target).await?;
        tracing::info!(change_set = %target.change_set_id, "abandon requested");
        Ok(())
    }

    /// Run a mutation against the selected change set.
    ///
    /// When the mainline is selected the server branches a new change set to
    /// hold the edit; the creation latch is held for the whole call. Any call
    /// made while the latch is held fails with
    /// [`SessionError::CreationInProgress`] and sends nothing.
    pub async fn mutate_selected<T, F, Fut>(&self, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(Visibility) -> Fut,
        Fut: Future<Output = gateway::Result<T>>,
    {
        self.ensure_live()?;
        if self.inner.latch.is_held() {
            return Err(SessionError::CreationInProgress);
        }
        let change_set_id = self
            .selected_id()
            .ok_or(SessionError::NoChangeSetSelected)?;

        let _guard = if change_set_id.is_head() {
            let guard = self
                .inner
                .latch
                .try_acquire()
                .ok_or(SessionError::CreationInProgress)?;
            tracing::info!(workspace = %self.inner.workspace_id, "implicit change set creation started");
            Some(guard)
        } else {
            None
        };

        let output = op(Visibility::new(self.inner.workspace_id, change_set_id)).await?;
        Ok(output)
    }

    // ── Internals shared with the protocol and reconciliation ───

    pub(crate) fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn gateway(&self) -> &dyn CommandGateway {
        self.inner.gateway.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn KeyValueStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub(crate) fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_torn_down() {
            return Err(SessionError::TornDown(self.inner.workspace_id));
        }
        Ok(())
    }

    /// The selected change set as a command target.
    pub(crate) fn selected_target(
        &self,
        action: &'static str,
    ) -> Result<(Visibility, ChangeSet), SessionError> {
        self.ensure_live()?;
        let selected = self.selected().ok_or(SessionError::NoChangeSetSelected)?;
        if selected.is_head() {
            return Err(SessionError::MainlineImmutable { action });
        }
        Ok((
            Visibility::new(self.inner.workspace_id, selected.id),
            selected,
        ))
    }

    /// Record a write marker for `id`.
    pub(crate) fn mark_written(&self, id: ChangeSetId) {
        if self.is_torn_down() {
            return;
        }
        self.state().mark_written(id, Utc::now());
    }

    /// Write the selection to the persisted slot if it changed and is set.
    pub(crate) fn persist_selection(&self) {
        let selected = {
            let mut state = self.state();
            match state.selected_id() {
                Some(id) if state.last_persisted != Some(id) => {
                    state.last_persisted = Some(id);
                    id
                }
                _ => return,
            }
        };
        if let Err(e) = persistence::write_last_used(
            self.store(),
            self.namespace(),
            &self.inner.workspace_id,
            &selected,
        ) {
            tracing::warn!(change_set = %selected, "failed to persist last-used change set: {}", e);
        }
    }

    /// Mark torn down and drop all state. In-flight responses are discarded.
    pub(crate) fn discard(&self) {
        self.inner.torn_down.store(true, Ordering::Release);
        *self.state() = RegistryState::default();
    }
}
