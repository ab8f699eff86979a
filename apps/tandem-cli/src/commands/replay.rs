// replay.rs — `tandem replay`: run recorded realtime frames through a session.
//
// Each non-blank line of the events file is one frame, exactly as the bus
// would deliver it. An unrecognized frame aborts the replay. After the last
// frame the command waits out the write debounce window so the trailing
// refresh is reflected in the output.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tandem_changeset::WorkspaceId;
use tandem_events::RealtimeEvent;
use tandem_session::SessionConfig;

use super::{open_session, print_change_sets, print_tally};

pub async fn execute(
    config: &SessionConfig,
    workspace_id: WorkspaceId,
    seed: &Path,
    events: &Path,
    route: Option<&str>,
) -> anyhow::Result<()> {
    let text = fs::read_to_string(events)
        .with_context(|| format!("failed to read events file {}", events.display()))?;

    // Decode everything up front so a bad line fails before any state changes.
    let mut frames = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event = RealtimeEvent::decode(line)
            .with_context(|| format!("{}:{}: unrecognized frame", events.display(), index + 1))?;
        frames.push(event);
    }

    let session = open_session(config, workspace_id, seed).await?;
    let registry = session.registry();
    registry.navigate(route);

    for event in &frames {
        tracing::debug!(event = event.event_type(), change_set = %event.change_set_id(), "replaying");
        session.handle_event(event).await;
    }
    if session.is_refresh_pending() {
        tokio::time::sleep(config.written_debounce() * 2).await;
    }

    println!("Replayed {} event(s).\n", frames.len());
    print_change_sets(registry);

    for cs in registry.list_all() {
        print_tally(&format!("Votes on {}", cs.name), &registry.approvals(&cs.id));
    }
    if let Some(actor) = registry.post_apply_actor() {
        println!("Applied by {}", actor);
    }
    if let Some(actor) = registry.post_abandon_actor() {
        println!("Abandoned by {}", actor);
    }

    session.close();
    Ok(())
}
