//! # tandem-session
//!
//! The workspace-scoped change set core of Tandem.
//!
//! Keeps one client's view of change set state correct while its own
//! commands are in flight and while the realtime bus pushes transitions
//! caused by other collaborators.
//!
//! ## Key components
//!
//! - [`ChangeSetRegistry`] — id → record map with the mainline always first;
//!   lifecycle commands (fetch, create, apply, abandon) and derived views
//! - approval / abandon protocol — begin, cancel and vote commands plus the
//!   event patches that apply the server's authoritative transitions
//!   ([`VoteTally`], [`PatchOutcome`])
//! - [`Reconciler`] — routes realtime events, debouncing `ChangeSetWritten`
//! - [`auto_select`] and [`ChangeSetRegistry::generate_name`] — defaults
//! - [`CreationLatch`] — serializes implicit branch creation from the mainline
//! - [`WorkspaceSession`] — init (subscribe + first fetch) and teardown
//! - [`CommandGateway`] / [`KeyValueStore`] — seams to the transport and
//!   to last-used persistence
//! - [`LocalServer`] — in-process authority for tests and the CLI

pub mod config;
pub mod error;
pub mod gateway;
pub mod latch;
pub mod local;
pub mod persistence;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod selection;
pub mod session;

pub use config::{PersistenceConfig, RealtimeConfig, SessionConfig};
pub use error::{ErrorKind, SessionError};
pub use gateway::{CommandGateway, GatewayError, Visibility};
pub use latch::{CreationGuard, CreationLatch};
pub use local::{LocalGateway, LocalServer};
pub use persistence::{FileStore, KeyValueStore, MemoryStore};
pub use protocol::{PatchOutcome, VoteTally};
pub use reconcile::Reconciler;
pub use registry::ChangeSetRegistry;
pub use selection::auto_select;
pub use session::WorkspaceSession;
