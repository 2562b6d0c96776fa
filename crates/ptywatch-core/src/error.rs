use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to read a session's visible buffer
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The underlying terminal no longer exists (lifecycle event, not a fault)
    #[error("session {0} is gone")]
    SessionGone(String),
    /// Capture failed for some other reason; the session may still exist
    #[error("capture failed for {session_id}: {message}")]
    Failed { session_id: String, message: String },
}

/// Failure of one remote classification attempt
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request timed out after {0:?}")]
    Timeout(Duration),
    #[error("classifier transport failure: {0}")]
    Transport(String),
    #[error("classifier endpoint returned HTTP {0}")]
    HttpStatus(u16),
    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),
}

/// Status store failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Classifier pack loading failure
#[derive(Debug, Error)]
pub enum PackError {
    #[error("failed to read pack {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse pack {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid pattern {pattern:?} in pack {name}: {source}")]
    Pattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
