// error.rs — Error types for the change set data model.

use thiserror::Error;

use crate::id::ChangeSetId;

/// Errors that can occur while manipulating change set records.
#[derive(Debug, Error)]
pub enum ChangeSetError {
    /// Invalid status transition (e.g., Applied → Open).
    #[error("invalid transition from {from} to {to} for change set {change_set_id}")]
    InvalidTransition {
        change_set_id: ChangeSetId,
        from: String,
        to: String,
    },

    /// An identifier could not be parsed.
    #[error("invalid identifier '{value}': {source}")]
    InvalidId {
        value: String,
        source: uuid::Error,
    },
}
