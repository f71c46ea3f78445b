//! Capability traits for the key-value backend, the stream log and the
//! checkpoint store

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::EventId;
use crate::parser::parse_cursor;

/// Field map carried by a stream entry
pub type Fields = BTreeMap<String, String>;

/// One entry of a stream log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Log-assigned id
    pub id: EventId,
    /// Entry fields
    pub fields: Fields,
}

impl StreamEntry {
    /// Create an entry
    pub fn new(id: EventId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// Look up a field value
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Key-value backend with per-call atomicity
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Liveness probe; `false` when the backend is reachable but not serving
    async fn ping(&self) -> Result<bool>;

    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Append-only stream log
///
/// Implementations serialize concurrent appends themselves; callers use no
/// client-side locking.
#[async_trait]
pub trait LogService: Send + Sync {
    /// Append an entry and return its id
    async fn append(&self, stream: &str, fields: Fields) -> Result<EventId>;

    /// Drop the oldest entries so at most `max_len` remain
    ///
    /// With `approximate`, the implementation may keep more than `max_len`.
    /// Returns the number of entries removed.
    async fn trim(&self, stream: &str, max_len: usize, approximate: bool) -> Result<usize>;

    /// Entries with ids strictly greater than `after` (all entries for `None`)
    ///
    /// Waits up to `block` for new entries when none are available, then
    /// returns an empty list. At most `count` entries when given.
    async fn read(
        &self,
        stream: &str,
        after: Option<EventId>,
        block: Duration,
        count: Option<usize>,
    ) -> Result<Vec<StreamEntry>>;

    /// Oldest `count` entries, in append order
    async fn range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>>;

    /// Number of entries currently retained
    async fn len(&self, stream: &str) -> Result<usize>;
}

/// Persisted consumer cursor
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last processed id, or `None` when nothing was processed yet
    async fn load_checkpoint(&self, key: &str) -> Result<Option<EventId>>;

    /// Persist the last processed id
    async fn save_checkpoint(&self, key: &str, id: EventId) -> Result<()>;
}

/// Any key-value backend stores checkpoints as id text under a reserved key
#[async_trait]
impl<T> CheckpointStore for T
where
    T: KvBackend,
{
    async fn load_checkpoint(&self, key: &str) -> Result<Option<EventId>> {
        match self.get(key).await? {
            Some(raw) => {
                let text = String::from_utf8(raw)
                    .map_err(|e| Error::InvalidEventId(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
                parse_cursor(&text)
            }
            None => Ok(None),
        }
    }

    async fn save_checkpoint(&self, key: &str, id: EventId) -> Result<()> {
        self.set(key, id.to_string().as_bytes()).await
    }
}
