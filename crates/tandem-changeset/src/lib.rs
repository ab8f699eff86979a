//! # tandem-changeset
//!
//! The change set data model for Tandem.
//!
//! A [`ChangeSet`] is one isolated, named editing context ("branch") against
//! a shared workspace. It is later merged (applied) or discarded (abandoned)
//! through a multi-party approval vote. One synthetic record, the mainline
//! ([`ChangeSetId::HEAD`]), always exists and is never created or destroyed.
//!
//! ## Key components
//!
//! - [`ChangeSet`] — one change set record as reported by the server
//! - [`ChangeSetStatus`] — the lifecycle state machine
//!   (Open → NeedsApproval → Applied, Open → NeedsAbandonApproval → Abandoned)
//! - [`ChangeSetId`], [`WorkspaceId`], [`UserId`] — strongly typed identifiers
//! - [`generate_name`] — the "Change Set N" default-name heuristic

pub mod changeset;
pub mod error;
pub mod id;
pub mod naming;

pub use changeset::{ChangeSet, ChangeSetStatus, HEAD_NAME};
pub use error::ChangeSetError;
pub use id::{ChangeSetId, UserId, WorkspaceId, HEAD_ROUTE_TOKEN};
pub use naming::{generate_name, DEFAULT_NAME_PREFIX};
