// latch.rs — Single-permit latch serializing implicit branch creation.
//
// Editing while the mainline is selected makes the server branch a new change
// set. Only one such mutation may be outstanding: a second attempt fails
// immediately instead of queueing. The latch guards only that path and is
// not a lock over the registry.

use std::sync::atomic::{AtomicBool, Ordering};

/// The implicit-creation latch.
#[derive(Debug, Default)]
pub struct CreationLatch {
    held: AtomicBool,
}

impl CreationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the latch if nobody holds it.
    pub fn try_acquire(&self) -> Option<CreationGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CreationGuard { latch: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the latch on drop.
#[derive(Debug)]
pub struct CreationGuard<'a> {
    latch: &'a CreationLatch,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.latch.held.store(false, Ordering::Release);
    }
}
