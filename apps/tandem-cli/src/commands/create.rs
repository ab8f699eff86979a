// create.rs — `tandem create`: create a change set through a session.

use std::path::Path;

use tandem_changeset::WorkspaceId;
use tandem_session::SessionConfig;

use super::{open_session, print_change_sets};

pub async fn execute(
    config: &SessionConfig,
    workspace_id: WorkspaceId,
    seed: &Path,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let session = open_session(config, workspace_id, seed).await?;
    let registry = session.registry();

    let name = match name {
        Some(name) => name.to_string(),
        None => registry.generate_name(),
    };
    let created = registry.create(&name).await?;
    registry.activate(created.id).await?;

    println!("Created {} ({})\n", created.name, created.id);
    print_change_sets(registry);

    session.close();
    Ok(())
}
