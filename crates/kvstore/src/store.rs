//! Embedded reference store implementing all three capability traits
//!
//! File layout (persistent mode):
//! - `store.json`: snapshot of every key, stream and stream cursor
//! - `store.json.tmp`: scratch file renamed over the snapshot on each write

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backend::{Fields, KvBackend, LogService, StreamEntry};
use crate::error::{Error, Result};
use crate::id::EventId;

/// Snapshot file name inside the store directory
const SNAPSHOT_FILE: &str = "store.json";

/// Operations that can be made to fail once via [`EmbeddedStore::fail_next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// `KvBackend::ping`
    Ping,
    /// `KvBackend::get`
    Get,
    /// `KvBackend::set`
    Set,
    /// `LogService::append`
    Append,
    /// `LogService::trim`
    Trim,
    /// `LogService::read`, `range` and `len`
    Read,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StreamState {
    entries: VecDeque<StreamEntry>,
    /// Survives trimming so ids keep increasing after the log is emptied
    last_id: Option<EventId>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    kv: BTreeMap<String, Vec<u8>>,
    streams: BTreeMap<String, StreamState>,
}

/// In-process key-value store and stream log
///
/// Runs purely in memory, or snapshots its whole state to a directory after
/// every mutation so separate processes can share it one after another.
/// A mutation whose snapshot fails to write is undone before the error is
/// returned.
///
/// Each snapshot rewrites the whole file with blocking I/O while the state
/// lock is held, so persistent mode suits small stores and CLI use, not
/// write-heavy async workloads.
pub struct EmbeddedStore {
    /// Snapshot file (None in memory-only mode)
    path: Option<PathBuf>,

    /// All keys and streams
    state: RwLock<Snapshot>,

    /// Wakes readers blocked in `read`
    appended: Notify,

    /// Approximate trims only drop whole chunks of this many entries
    trim_granularity: usize,

    /// Injected one-shot failures
    fail_points: Mutex<Vec<FailPoint>>,

    /// Is the store closed?
    closed: RwLock<bool>,
}

impl EmbeddedStore {
    /// Create an empty memory-only store
    pub fn in_memory() -> Self {
        Self::with_state(None, Snapshot::default())
    }

    /// Open or create a persistent store in the given directory
    ///
    /// # Arguments
    /// * `path` - Directory holding the snapshot file
    ///
    /// # Returns
    /// * `Result<EmbeddedStore>` - Store handle
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dir = path.as_ref();
        fs::create_dir_all(dir)?;

        let file = dir.join(SNAPSHOT_FILE);
        let state = if file.exists() {
            let raw = fs::read(&file)?;
            let state: Snapshot = serde_json::from_slice(&raw)?;
            info!(path = %file.display(), keys = state.kv.len(), streams = state.streams.len(), "Opened store");
            state
        } else {
            info!(path = %file.display(), "Creating new store");
            Snapshot::default()
        };

        let store = Self::with_state(Some(file), state);
        store.persist(&store.state.read())?;
        Ok(store)
    }

    fn with_state(path: Option<PathBuf>, state: Snapshot) -> Self {
        Self {
            path,
            state: RwLock::new(state),
            appended: Notify::new(),
            trim_granularity: 1,
            fail_points: Mutex::new(Vec::new()),
            closed: RwLock::new(false),
        }
    }

    /// Make approximate trims drop entries only in chunks of `granularity`
    ///
    /// The default of 1 makes approximate trims exact.
    pub fn with_trim_granularity(mut self, granularity: usize) -> Self {
        self.trim_granularity = granularity.max(1);
        self
    }

    /// Snapshot file path, if persistent
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Make the next call of the given operation fail with `Error::Unavailable`
    pub fn fail_next(&self, point: FailPoint) {
        self.fail_points.lock().push(point);
    }

    /// Flush the snapshot and refuse further operations
    pub fn close(&self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }

        self.persist(&self.state.read())?;
        *self.closed.write() = true;
        self.appended.notify_waiters();

        Ok(())
    }

    /// Check if the store is closed
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }

        let mut fail_points = self.fail_points.lock();
        if let Some(pos) = fail_points.iter().position(|p| *p == point) {
            fail_points.remove(pos);
            return Err(Error::Unavailable(format!("injected {:?} failure", point)));
        }

        Ok(())
    }

    fn persist(&self, state: &Snapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(state)?)?;
        fs::rename(&tmp, path)?;

        Ok(())
    }

    fn entries_after(
        &self,
        stream: &str,
        after: Option<EventId>,
        count: Option<usize>,
    ) -> Vec<StreamEntry> {
        let state = self.state.read();
        let Some(stream) = state.streams.get(stream) else {
            return Vec::new();
        };

        let start = match after {
            Some(after) => stream.entries.partition_point(|e| e.id <= after),
            None => 0,
        };

        stream
            .entries
            .iter()
            .skip(start)
            .take(count.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

#[async_trait]
impl KvBackend for EmbeddedStore {
    async fn ping(&self) -> Result<bool> {
        if *self.closed.read() {
            return Ok(false);
        }
        self.check(FailPoint::Ping)?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check(FailPoint::Get)?;
        Ok(self.state.read().kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check(FailPoint::Set)?;

        let mut state = self.state.write();
        let previous = state.kv.insert(key.to_string(), value.to_vec());

        if let Err(e) = self.persist(&state) {
            match previous {
                Some(previous) => state.kv.insert(key.to_string(), previous),
                None => state.kv.remove(key),
            };
            return Err(e);
        }

        Ok(())
    }
}

#[async_trait]
impl LogService for EmbeddedStore {
    async fn append(&self, stream: &str, fields: Fields) -> Result<EventId> {
        self.check(FailPoint::Append)?;

        let id = {
            let mut state = self.state.write();
            let created = !state.streams.contains_key(stream);
            let log = state.streams.entry(stream.to_string()).or_default();

            let previous_id = log.last_id;
            let id = EventId::next_after(previous_id, now_ms());
            log.entries.push_back(StreamEntry::new(id, fields));
            log.last_id = Some(id);

            if let Err(e) = self.persist(&state) {
                if created {
                    state.streams.remove(stream);
                } else if let Some(log) = state.streams.get_mut(stream) {
                    log.entries.pop_back();
                    log.last_id = previous_id;
                }
                return Err(e);
            }
            id
        };

        debug!(stream, %id, "Appended entry");
        self.appended.notify_waiters();

        Ok(id)
    }

    async fn trim(&self, stream: &str, max_len: usize, approximate: bool) -> Result<usize> {
        self.check(FailPoint::Trim)?;

        let mut state = self.state.write();
        let Some(log) = state.streams.get_mut(stream) else {
            return Ok(0);
        };

        let excess = log.entries.len().saturating_sub(max_len);
        let removed = if approximate {
            excess - excess % self.trim_granularity
        } else {
            excess
        };

        if removed == 0 {
            return Ok(0);
        }

        let dropped: Vec<StreamEntry> = log.entries.drain(..removed).collect();

        if let Err(e) = self.persist(&state) {
            if let Some(log) = state.streams.get_mut(stream) {
                for entry in dropped.into_iter().rev() {
                    log.entries.push_front(entry);
                }
            }
            return Err(e);
        }
        debug!(stream, removed, max_len, approximate, "Trimmed stream");

        Ok(removed)
    }

    async fn read(
        &self,
        stream: &str,
        after: Option<EventId>,
        block: Duration,
        count: Option<usize>,
    ) -> Result<Vec<StreamEntry>> {
        self.check(FailPoint::Read)?;
        let deadline = Instant::now() + block;

        loop {
            // Register interest before looking, so an append in between is not missed
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.entries_after(stream, after, count);
            if !entries.is_empty() || block.is_zero() {
                return Ok(entries);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }

            if *self.closed.read() {
                return Err(Error::Closed);
            }
        }
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        self.check(FailPoint::Read)?;
        Ok(self.entries_after(stream, None, Some(count)))
    }

    async fn len(&self, stream: &str) -> Result<usize> {
        self.check(FailPoint::Read)?;
        Ok(self
            .state
            .read()
            .streams
            .get(stream)
            .map_or(0, |log| log.entries.len()))
    }
}
