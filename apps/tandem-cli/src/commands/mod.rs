pub mod create;
pub mod inspect;
pub mod replay;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tandem_changeset::{ChangeSet, UserId, WorkspaceId};
use tandem_events::MemoryBus;
use tandem_session::{
    ChangeSetRegistry, FileStore, LocalServer, SessionConfig, VoteTally, WorkspaceSession,
};

/// Acting user for commands issued from the CLI.
const CLI_USER: &str = "tandem-cli";

/// Read the server's change sets from a JSON array.
pub fn load_seed(path: &Path) -> anyhow::Result<Vec<ChangeSet>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let change_sets: Vec<ChangeSet> = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse seed file {}", path.display()))?;
    Ok(change_sets)
}

/// Open a session over a local authority seeded from `seed`.
pub async fn open_session(
    config: &SessionConfig,
    workspace_id: WorkspaceId,
    seed: &Path,
) -> anyhow::Result<WorkspaceSession> {
    let bus = Arc::new(MemoryBus::new());
    let server = Arc::new(LocalServer::new().with_bus(bus.clone()));
    server.seed(workspace_id, load_seed(seed)?);

    let store = Arc::new(FileStore::new(config.persistence.resolved_dir())?);
    let session = WorkspaceSession::open(
        workspace_id,
        Arc::new(server.gateway(UserId::from(CLI_USER))),
        bus,
        store,
        config,
    )
    .await?;
    Ok(session)
}

pub fn print_change_sets(registry: &ChangeSetRegistry) {
    let selected = registry.selected_id();
    println!(
        "{:<2} {:<38} {:<24} {:<24} {:<26}",
        "", "CHANGE SET ID", "NAME", "STATUS", "LAST WRITTEN"
    );
    println!("{}", "-".repeat(118));

    for cs in registry.list_all() {
        let marker = if selected == Some(cs.id) { "*" } else { "" };
        let written = registry
            .written_at(&cs.id)
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<2} {:<38} {:<24} {:<24} {:<26}",
            marker,
            cs.id,
            truncate(&cs.name, 22),
            cs.status.to_string(),
            written,
        );
    }

    println!(
        "\n{} change set(s), {} open.",
        registry.len(),
        registry.list_open().len()
    );
}

pub fn print_tally(label: &str, tally: &VoteTally) {
    if tally.is_empty() {
        return;
    }
    println!("{}:", label);
    for (user, vote) in tally.iter() {
        println!("  {:<24} {}", user, vote);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
