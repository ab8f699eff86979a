// session.rs — WorkspaceSession: init and teardown of one workspace context.
//
// open():  subscribe to the workspace topic, then seed the registry with a
//          full fetch. Subscribing first means no event emitted during the
//          first fetch is lost; a failed seed undoes the subscription.
// close(): unsubscribe (synchronous), cancel the pending debounce timer and
//          discard all registry state. Later commands fail with TornDown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tandem_changeset::WorkspaceId;
use tandem_events::{EventBus, RealtimeEvent, Topic};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::gateway::CommandGateway;
use crate::persistence::KeyValueStore;
use crate::reconcile::Reconciler;
use crate::registry::ChangeSetRegistry;

/// One live workspace context.
///
/// Dropping the session closes it.
pub struct WorkspaceSession {
    registry: ChangeSetRegistry,
    reconciler: Arc<Reconciler>,
    bus: Arc<dyn EventBus>,
    subscriber: String,
    closed: AtomicBool,
}

impl WorkspaceSession {
    /// Enter a workspace: subscribe to its topic and perform the first fetch.
    pub async fn open(
        workspace_id: WorkspaceId,
        gateway: Arc<dyn CommandGateway>,
        bus: Arc<dyn EventBus>,
        store: Arc<dyn KeyValueStore>,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let registry = ChangeSetRegistry::new(
            workspace_id,
            gateway.clone(),
            store,
            config.persistence.namespace.clone(),
        );
        let reconciler = Arc::new(Reconciler::new(
            registry.clone(),
            config.written_debounce(),
        ));
        let subscriber = format!("change-sets/{}/{}", workspace_id, Uuid::new_v4());
        bus.subscribe(&subscriber, Topic::Workspace(workspace_id), reconciler.clone());

        let session = Self {
            registry,
            reconciler,
            bus,
            subscriber,
            closed: AtomicBool::new(false),
        };

        if let Err(e) = session.registry.fetch_all().await {
            tracing::warn!(workspace = %workspace_id, "initial change set fetch failed: {}", e);
            session.close();
            return Err(e);
        }

        tracing::info!(
            workspace = %workspace_id,
            gateway = gateway.name(),
            change_sets = session.registry.len(),
            "workspace session opened"
        );
        Ok(session)
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.registry.workspace_id()
    }

    /// The registry this session keeps live.
    pub fn registry(&self) -> &ChangeSetRegistry {
        &self.registry
    }

    /// Name this session's subscription is registered under.
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    /// Whether a debounced write refresh is waiting to fire.
    pub fn is_refresh_pending(&self) -> bool {
        self.reconciler.is_refresh_pending()
    }

    /// Reconcile an event delivered outside the bus subscription.
    pub async fn handle_event(&self, event: &RealtimeEvent) {
        self.reconciler.reconcile(event).await;
    }

    /// Decode and reconcile one raw frame from the transport.
    ///
    /// # Panics
    ///
    /// Panics if the frame is malformed or carries an unrecognized event
    /// kind. The bus contract only allows the known set, so anything else is
    /// protocol drift and must not be skipped silently.
    pub async fn handle_frame(&self, frame: &str) {
        let event = match RealtimeEvent::decode(frame) {
            Ok(event) => event,
            Err(e) => panic!(
                "unrecognized realtime frame for workspace {}: {}",
                self.workspace_id(),
                e
            ),
        };
        self.handle_event(&event).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Leave the workspace. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.unsubscribe(&self.subscriber);
        self.reconciler.cancel();
        self.registry.discard();
        tracing::info!(workspace = %self.workspace_id(), "workspace session closed");
    }
}

impl Drop for WorkspaceSession {
    fn drop(&mut self) {
        self.close();
    }
}
