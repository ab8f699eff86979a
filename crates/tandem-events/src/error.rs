// error.rs — Error types for the realtime event subsystem.

use thiserror::Error;

/// Errors that can occur while decoding realtime frames.
#[derive(Debug, Error)]
pub enum EventError {
    /// The frame is not valid JSON or carries an unrecognized event tag.
    #[error("malformed realtime frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
