// selection.rs — Auto-selection and name defaults derived from the registry.
//
// Selection itself is derived from navigation (see `ChangeSetRegistry::navigate`).
// This module answers two questions a caller asks before navigating:
// which change set to open by default, and what to call a new one.

use indexmap::IndexMap;
use tandem_changeset::{generate_name, ChangeSet, ChangeSetId, ChangeSetStatus};

use crate::persistence;
use crate::registry::ChangeSetRegistry;

/// Most open change sets (mainline included) for which a default is
/// picked without asking the user.
pub const UNAMBIGUOUS_OPEN_LIMIT: usize = 2;

/// Pick a default change set.
///
/// 1. The last-used id, if the registry knows it and it is `Open`.
/// 2. Otherwise, with at most two open change sets, the last one in
///    iteration order (the single branch, or the mainline on its own).
/// 3. Otherwise `None`: the choice is ambiguous and the user must pick.
pub fn auto_select(
    last_used: Option<ChangeSetId>,
    change_sets: &IndexMap<ChangeSetId, ChangeSet>,
) -> Option<ChangeSetId> {
    if let Some(id) = last_used {
        if change_sets
            .get(&id)
            .is_some_and(|cs| cs.status == ChangeSetStatus::Open)
        {
            return Some(id);
        }
    }

    let open: Vec<&ChangeSet> = change_sets.values().filter(|cs| cs.status.is_open()).collect();
    if open.len() <= UNAMBIGUOUS_OPEN_LIMIT {
        return open.last().map(|cs| cs.id);
    }
    None
}

impl ChangeSetRegistry {
    /// Default change set to open for this workspace, if one is unambiguous.
    pub fn auto_select(&self) -> Option<ChangeSetId> {
        let last_used =
            persistence::read_last_used(self.store(), self.namespace(), &self.workspace_id());
        let state = self.state();
        let picked = auto_select(last_used, &state.change_sets);
        tracing::debug!(?last_used, ?picked, "auto-selected change set");
        picked
    }

    /// Next "Change Set N" name given every known change set.
    pub fn generate_name(&self) -> String {
        let state = self.state();
        generate_name(state.change_sets.values().map(|cs| cs.name.as_str()))
    }
}
