//! Error types for kvstore and the crates built on it

use std::io;

use thiserror::Error;

/// Result type alias for store, cache and log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by caller-supplied code (loaders, batch handlers)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types shared across the workspace
#[derive(Debug, Error)]
pub enum Error {
    /// Backend or log service could not serve the request
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Store has been closed
    #[error("Store is closed")]
    Closed,

    /// Loader behind a cache miss failed; the cache was not populated
    #[error("Loader failed: {0}")]
    Loader(#[source] BoxError),

    /// Consumer batch handler failed; the checkpoint was not advanced
    #[error("Batch handler failed: {0}")]
    Handler(#[source] BoxError),

    /// The store write succeeded but the invalidation event was not recorded
    #[error("Write for key '{key}' succeeded but its invalidation was not recorded: {source}")]
    InvalidationLost {
        /// Key whose write went unrecorded
        key: String,
        /// Why recording failed
        #[source]
        source: Box<Error>,
    },

    /// Malformed stream entry id
    #[error("Invalid event id: {0:?}")]
    InvalidEventId(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted snapshot could not be encoded or decoded
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a loader failure
    pub fn loader<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Loader(err.into())
    }

    /// Wrap a batch handler failure
    pub fn handler<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Handler(err.into())
    }

    /// True for connection-level failures of the backend or log service
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Closed | Error::Io(_))
    }
}
