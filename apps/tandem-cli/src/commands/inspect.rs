// inspect.rs — `tandem inspect`: one-shot view of a seeded registry.

use std::path::Path;

use tandem_changeset::WorkspaceId;
use tandem_session::SessionConfig;

use super::{open_session, print_change_sets};

pub async fn execute(
    config: &SessionConfig,
    workspace_id: WorkspaceId,
    seed: &Path,
) -> anyhow::Result<()> {
    let session = open_session(config, workspace_id, seed).await?;
    let registry = session.registry();

    println!("Workspace: {}\n", workspace_id);
    print_change_sets(registry);

    match registry.auto_select() {
        Some(id) => println!("Default:   {}", id),
        None => println!("Default:   (ambiguous, pick one explicitly)"),
    }
    println!("Next name: {}", registry.generate_name());

    session.close();
    Ok(())
}
