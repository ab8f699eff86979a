//! # tandem-events
//!
//! Realtime event model and subscription plumbing for Tandem.
//!
//! The server pushes change set state transitions caused by other
//! collaborators over a per-topic, ordered, at-least-once event bus. This
//! crate defines the events, the [`EventBus`] seam the session core consumes,
//! an in-process [`MemoryBus`], and the trailing [`Debouncer`] used to
//! collapse bursts of write markers.
//!
//! ## Key components
//!
//! - [`RealtimeEvent`] — every event the session core understands
//! - [`Topic`] — workspace or change set scope of a subscription
//! - [`EventBus`] / [`EventHandler`] — subscribe/unsubscribe and dispatch
//! - [`MemoryBus`] — in-order, in-process delivery (tests and local tools)
//! - [`Debouncer`] — per-key trailing debounce with cancellation

pub mod bus;
pub mod debounce;
pub mod error;
pub mod event;

pub use bus::{EventBus, EventHandler, MemoryBus, Topic};
pub use debounce::{DebouncedHandler, Debouncer};
pub use error::EventError;
pub use event::{RealtimeEvent, VoteKind};
