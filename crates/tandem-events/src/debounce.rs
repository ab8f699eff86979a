//! Trailing debounce for bursty event handlers.
//!
//! Some server actions touch many entities and emit one event per entity.
//! The [`Debouncer`] collapses such a burst: every [`push`](Debouncer::push)
//! restarts a quiet-period timer, and only when the timer expires with no
//! further pushes is the handler invoked, once, with the most recent value.
//!
//! [`cancel`](Debouncer::cancel) aborts a pending timer and refuses every
//! later push, so nothing fires into a torn-down owner.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// Invoked once per quiet burst with the last pushed value.
#[async_trait]
pub trait DebouncedHandler<T>: Send + Sync {
    async fn fire(&self, value: T);
}

struct Pending {
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct DebounceState {
    next_generation: u64,
    pending: Option<Pending>,
    cancelled: bool,
}

/// Manages one trailing timer for a single subscription key.
///
/// Must be used from within a tokio runtime: timers are spawned tasks.
pub struct Debouncer<T> {
    window: Duration,
    handler: Arc<dyn DebouncedHandler<T>>,
    state: Arc<Mutex<DebounceState>>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Create a debouncer that fires `handler` after `window` of quiet.
    pub fn new(window: Duration, handler: Arc<dyn DebouncedHandler<T>>) -> Self {
        Self {
            window,
            handler,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a new value and restart the quiet-period timer.
    ///
    /// Returns `false` (and drops the value) once the debouncer is cancelled.
    pub fn push(&self, value: T) -> bool {
        let mut state = lock(&self.state);
        if state.cancelled {
            tracing::debug!("debouncer cancelled, dropping value");
            return false;
        }

        // Still sleeping: the burst continues, restart from now.
        if let Some(previous) = state.pending.take() {
            previous.timer.abort();
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let window = self.window;
        let handler = self.handler.clone();
        let shared = self.state.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut state = lock(&shared);
                let current = state
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.generation == generation);
                if state.cancelled || !current {
                    return;
                }
                // Claim the burst. A push from here on starts a new one and
                // leaves this invocation running.
                state.pending = None;
            }
            handler.fire(value).await;
        });

        state.pending = Some(Pending { generation, timer });
        true
    }

    /// Whether a timer is waiting to fire.
    pub fn is_pending(&self) -> bool {
        lock(&self.state)
            .pending
            .as_ref()
            .is_some_and(|p| !p.timer.is_finished())
    }

    /// Abort any pending timer and refuse further pushes.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.cancelled = true;
        if let Some(pending) = state.pending.take() {
            pending.timer.abort();
            tracing::debug!("pending debounce timer aborted");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.state).cancelled
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.cancelled = true;
        if let Some(pending) = state.pending.take() {
            pending.timer.abort();
        }
    }
}

fn lock(state: &Mutex<DebounceState>) -> std::sync::MutexGuard<'_, DebounceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
