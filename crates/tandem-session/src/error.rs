// error.rs — Error types for the session core.
//
// Local errors (precondition, race, validation, transition) are raised before
// anything is sent to the gateway and are never retried here. Remote errors
// are the gateway's failure, passed through unchanged.

use std::path::PathBuf;

use tandem_changeset::{ChangeSetError, ChangeSetId, ChangeSetStatus, WorkspaceId};
use thiserror::Error;

use crate::gateway::GatewayError;

/// Coarse classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required change set selection is missing.
    Precondition,
    /// The implicit-creation latch is held; retry after it resolves.
    Race,
    /// Caller input rejected locally.
    Validation,
    /// The gateway reported a failure.
    Remote,
    /// The requested lifecycle step is not allowed from the current state.
    Transition,
    /// The session has been torn down.
    Lifecycle,
    /// Persistence I/O failed.
    Io,
    /// Configuration could not be read.
    Config,
}

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation that targets the selected change set ran with none selected.
    #[error("no change set selected")]
    NoChangeSetSelected,

    /// An implicit branch creation from the mainline is still outstanding.
    #[error("race: wait until the change set is created")]
    CreationInProgress,

    /// A change set name was rejected before reaching the gateway.
    #[error("invalid change set name: {0}")]
    InvalidName(String),

    /// A vote value was rejected before reaching the gateway.
    #[error("invalid vote: {0}")]
    InvalidVote(String),

    /// The command needs a different status than the change set has.
    #[error("change set {change_set_id} is {status}, expected {expected}")]
    UnexpectedStatus {
        change_set_id: ChangeSetId,
        status: ChangeSetStatus,
        expected: ChangeSetStatus,
    },

    /// The gateway reported a failure.
    #[error("remote error: {0}")]
    Remote(#[from] GatewayError),

    /// The mainline change set cannot go through lifecycle commands.
    #[error("the mainline change set cannot be {action}")]
    MainlineImmutable { action: &'static str },

    /// Invalid status transition or malformed identifier.
    #[error(transparent)]
    ChangeSet(#[from] ChangeSetError),

    /// The workspace session was closed.
    #[error("session for workspace {0} has been torn down")]
    TornDown(WorkspaceId),

    /// A persistence I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("config error in {path}: {source}")]
    ConfigError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NoChangeSetSelected => ErrorKind::Precondition,
            SessionError::CreationInProgress => ErrorKind::Race,
            SessionError::InvalidName(_) | SessionError::InvalidVote(_) => ErrorKind::Validation,
            SessionError::UnexpectedStatus { .. } => ErrorKind::Transition,
            SessionError::Remote(_) => ErrorKind::Remote,
            SessionError::MainlineImmutable { .. } => ErrorKind::Transition,
            SessionError::ChangeSet(ChangeSetError::InvalidTransition { .. }) => {
                ErrorKind::Transition
            }
            SessionError::ChangeSet(_) => ErrorKind::Validation,
            SessionError::TornDown(_) => ErrorKind::Lifecycle,
            SessionError::IoError { .. } => ErrorKind::Io,
            SessionError::ConfigError { .. } => ErrorKind::Config,
        }
    }
}
