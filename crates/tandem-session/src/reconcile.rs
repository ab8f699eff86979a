// reconcile.rs — Applies realtime events from the workspace topic.
//
// Routing:
//   ChangeSetCreated              → full fetch (list membership changed)
//   ChangeSetCancelled            → patch to Abandoned, then full fetch
//   ChangeSetWritten              → debounced: freshness marker + full fetch
//   begin/cancel, applied, votes  → patch in place, no fetch
//
// Events are applied in delivery order. Nothing is reordered or deduplicated;
// the only coalescing is the ChangeSetWritten debounce, which acts on the
// last event of a burst.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tandem_changeset::ChangeSetId;
use tandem_events::{DebouncedHandler, Debouncer, EventHandler, RealtimeEvent};

use crate::registry::ChangeSetRegistry;

/// Event handler for one workspace subscription.
pub struct Reconciler {
    registry: ChangeSetRegistry,
    written: Debouncer<ChangeSetId>,
}

impl Reconciler {
    /// `written_window` is the quiet period that ends a `ChangeSetWritten` burst.
    pub fn new(registry: ChangeSetRegistry, written_window: Duration) -> Self {
        let trailing = Arc::new(WrittenRefresh {
            registry: registry.clone(),
        });
        Self {
            registry,
            written: Debouncer::new(written_window, trailing),
        }
    }

    /// Apply one event.
    pub async fn reconcile(&self, event: &RealtimeEvent) {
        if self.registry.is_torn_down() {
            tracing::debug!(event = event.event_type(), "session torn down, dropping event");
            return;
        }

        match event {
            RealtimeEvent::ChangeSetCreated { change_set_id } => {
                tracing::debug!(change_set = %change_set_id, "change set created remotely");
                refresh(&self.registry, event.event_type()).await;
            }
            RealtimeEvent::ChangeSetCancelled { .. } => {
                self.registry.apply_event(event);
                // The patch alone can miss state if an earlier event was lost.
                refresh(&self.registry, event.event_type()).await;
            }
            RealtimeEvent::ChangeSetWritten { change_set_id } => {
                self.written.push(*change_set_id);
            }
            _ => {
                self.registry.apply_event(event);
            }
        }
    }

    /// Whether a debounced write refresh is waiting to fire.
    pub fn is_refresh_pending(&self) -> bool {
        self.written.is_pending()
    }

    /// Abort the pending write refresh and refuse later ones.
    pub fn cancel(&self) {
        self.written.cancel();
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: &RealtimeEvent) {
        self.reconcile(event).await;
    }
}

/// Trailing action of a `ChangeSetWritten` burst.
struct WrittenRefresh {
    registry: ChangeSetRegistry,
}

#[async_trait]
impl DebouncedHandler<ChangeSetId> for WrittenRefresh {
    async fn fire(&self, change_set_id: ChangeSetId) {
        if self.registry.is_torn_down() {
            return;
        }
        self.registry.mark_written(change_set_id);
        refresh(&self.registry, "ChangeSetWritten").await;
    }
}

/// Full fetch on behalf of an event. Failures are logged, not propagated:
/// there is no caller to hand them to.
async fn refresh(registry: &ChangeSetRegistry, cause: &'static str) {
    if let Err(e) = registry.fetch_all().await {
        if registry.is_torn_down() {
            tracing::debug!(cause, "refresh abandoned after teardown");
        } else {
            tracing::warn!(cause, "background change set refresh failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::fixture;
    use tandem_changeset::{ChangeSet, ChangeSetStatus, UserId};

    const WINDOW: Duration = Duration::from_millis(100);

    fn written(id: ChangeSetId) -> RealtimeEvent {
        RealtimeEvent::ChangeSetWritten { change_set_id: id }
    }

    fn fetches(fx: &crate::registry::tests::Fixture) -> usize {
        fx.server.call_count("list_open_change_sets")
    }

    #[tokio::test(start_paused = true)]
    async fn written_burst_refreshes_once() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        let reconciler = Reconciler::new(fx.registry.clone(), WINDOW);

        for _ in 0..5 {
            reconciler.reconcile(&written(ids[0])).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fetches(&fx), 1);
        assert!(fx.registry.written_at(&ids[0]).is_none());

        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(fetches(&fx), 2);
        assert!(fx.registry.written_at(&ids[0]).is_some());
        assert!(!reconciler.is_refresh_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn written_burst_uses_last_event() {
        let (fx, ids) = fixture(&["Change Set 1", "Change Set 2"]);
        fx.registry.fetch_all().await.unwrap();
        let reconciler = Reconciler::new(fx.registry.clone(), WINDOW);

        reconciler.reconcile(&written(ids[0])).await;
        reconciler.reconcile(&written(ids[1])).await;
        tokio::time::sleep(WINDOW * 2).await;

        assert!(fx.registry.written_at(&ids[0]).is_none());
        assert!(fx.registry.written_at(&ids[1]).is_some());
        assert_eq!(fetches(&fx), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_pending_refresh() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        let reconciler = Reconciler::new(fx.registry.clone(), WINDOW);

        reconciler.reconcile(&written(ids[0])).await;
        assert!(reconciler.is_refresh_pending());
        reconciler.cancel();

        tokio::time::sleep(WINDOW * 3).await;
        assert_eq!(fetches(&fx), 1);
        assert!(fx.registry.written_at(&ids[0]).is_none());
    }

    #[tokio::test]
    async fn created_event_triggers_fetch() {
        let (fx, _) = fixture(&[]);
        fx.registry.fetch_all().await.unwrap();
        let reconciler = Reconciler::new(fx.registry.clone(), WINDOW);

        let late = ChangeSet::new(ChangeSetId::new_v4(), "Change Set 1");
        fx.server.seed(fx.workspace_id, [late.clone()]);
        reconciler
            .reconcile(&RealtimeEvent::ChangeSetCreated {
                change_set_id: late.id,
            })
            .await;

        assert_eq!(fetches(&fx), 2);
        assert!(fx.registry.get(&late.id).is_some());
    }

    #[tokio::test]
    async fn cancelled_event_patches_then_fetches() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        fx.registry.navigate_to(Some(ids[0]));
        let reconciler = Reconciler::new(fx.registry.clone(), WINDOW);

        // The server never abandoned it, so a successful follow-up fetch would
        // restore it. Fail that fetch to observe the patch on its own.
        fx.server.fail_next("list unavailable");
        reconciler
            .reconcile(&RealtimeEvent::ChangeSetCancelled {
                change_set_id: ids[0],
                user_id: UserId::from("bob"),
            })
            .await;

        assert_eq!(fetches(&fx), 2);
        assert_eq!(
            fx.registry.get(&ids[0]).unwrap().status,
            ChangeSetStatus::Abandoned
        );
        assert_eq!(fx.registry.post_abandon_actor(), Some(UserId::from("bob")));
    }

    #[tokio::test]
    async fn status_events_do_not_fetch() {
        let (fx, ids) = fixture(&["Change Set 1"]);
        fx.registry.fetch_all().await.unwrap();
        let reconciler = Reconciler::new(fx.registry.clone(), WINDOW);

        reconciler
            .reconcile(&RealtimeEvent::ChangeSetBeginApprovalProcess {
                change_set_id: ids[0],
                user_id: UserId::from("alice"),
            })
            .await;
        reconciler
            .reconcile(&RealtimeEvent::ChangeSetApplied {
                change_set_id: ids[0],
                user_id: UserId::from("alice"),
            })
            .await;

        assert_eq!(fetches(&fx), 1);
        assert_eq!(
            fx.registry.get(&ids[0]).unwrap().status,
            ChangeSetStatus::Applied
        );
    }

    #[tokio::test]
    async fn torn_down_registry_drops_events() {
        let (fx, _) = fixture(&[]);
        fx.registry.fetch_all().await.unwrap();
        let reconciler = Reconciler::new(fx.registry.clone(), WINDOW);
        fx.registry.discard();

        reconciler
            .reconcile(&RealtimeEvent::ChangeSetCreated {
                change_set_id: ChangeSetId::new_v4(),
            })
            .await;
        assert_eq!(fetches(&fx), 1);
    }
}
