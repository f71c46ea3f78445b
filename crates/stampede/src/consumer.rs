//! Invalidation log consumer
//!
//! Reads events after a cursor and keeps that cursor in a checkpoint store,
//! so a new process resumes where the last one stopped. Two checkpointing
//! modes:
//! - `read_from_checkpoint`: cursor advances once the batch is read
//! - `process_from_checkpoint`: cursor advances only after the handler
//!   succeeds, so a failed batch is delivered again

use std::future::Future;
use std::sync::Arc;

use kvstore::{BoxError, CheckpointStore, Error, EventId, LogService, Result};
use tracing::{debug, warn};

use crate::config::LogConfig;
use crate::event::InvalidationEvent;

/// Events returned by one read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Invalidations in append order
    pub events: Vec<InvalidationEvent>,
    /// Id of the last entry read, or the starting cursor if nothing was read
    pub cursor: Option<EventId>,
    /// Entries read past that were not well-formed invalidations
    pub skipped: usize,
}

impl Batch {
    /// Check if no event was read
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Invalidated keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|e| e.key.as_str())
    }
}

/// Reads invalidation events and tracks a persisted cursor
pub struct InvalidationLogConsumer<L: ?Sized, C: ?Sized> {
    log: Arc<L>,
    checkpoints: Arc<C>,
    config: LogConfig,
}

impl<L, C> InvalidationLogConsumer<L, C>
where
    L: LogService + ?Sized,
    C: CheckpointStore + ?Sized,
{
    /// Create a consumer of `config.stream` checkpointing under `config.checkpoint_key`
    pub fn new(log: Arc<L>, checkpoints: Arc<C>, config: LogConfig) -> Self {
        Self {
            log,
            checkpoints,
            config,
        }
    }

    /// Get the log configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Read events strictly after `cursor` (from the oldest retained for `None`)
    ///
    /// Waits at most the configured block timeout; a drained log yields an
    /// empty batch whose cursor is the one passed in.
    pub async fn read_from(&self, cursor: Option<EventId>) -> Result<Batch> {
        let entries = self
            .log
            .read(
                &self.config.stream,
                cursor,
                self.config.block_timeout(),
                Some(self.config.batch_size.max(1)),
            )
            .await?;

        let mut batch = Batch {
            events: Vec::with_capacity(entries.len()),
            cursor,
            skipped: 0,
        };

        for entry in &entries {
            // Malformed entries still move the cursor, or they would be re-read forever
            batch.cursor = Some(entry.id);
            match InvalidationEvent::from_entry(entry) {
                Some(event) => batch.events.push(event),
                None => {
                    warn!(stream = %self.config.stream, id = %entry.id, "Skipping malformed log entry");
                    batch.skipped += 1;
                }
            }
        }

        debug!(stream = %self.config.stream, events = batch.len(), skipped = batch.skipped, "Read invalidation batch");
        Ok(batch)
    }

    /// Get the persisted cursor
    pub async fn checkpoint(&self) -> Result<Option<EventId>> {
        self.checkpoints.load_checkpoint(&self.config.checkpoint_key).await
    }

    /// Read after the persisted cursor and persist the new cursor
    pub async fn read_from_checkpoint(&self) -> Result<Batch> {
        let start = self.checkpoint().await?;
        let batch = self.read_from(start).await?;
        self.advance(batch.cursor).await?;

        Ok(batch)
    }

    /// Read after the persisted cursor, run `handler`, then persist the cursor
    ///
    /// The cursor only moves when `handler` succeeds; on failure the same
    /// events are read again next time and `Error::Handler` is returned. An
    /// empty batch is returned without calling `handler`.
    pub async fn process_from_checkpoint<F, Fut, E>(&self, handler: F) -> Result<Batch>
    where
        F: FnOnce(Vec<InvalidationEvent>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        let start = self.checkpoint().await?;
        let batch = self.read_from(start).await?;

        if !batch.is_empty() {
            if let Err(err) = handler(batch.events.clone()).await {
                let err = err.into();
                warn!(stream = %self.config.stream, error = %err, "Batch handler failed, checkpoint not advanced");
                return Err(Error::Handler(err));
            }
        }

        self.advance(batch.cursor).await?;
        Ok(batch)
    }

    /// Persist `to` unless the stored cursor is already at or past it
    async fn advance(&self, to: Option<EventId>) -> Result<()> {
        let Some(to) = to else {
            return Ok(());
        };

        let current = self.checkpoint().await?;
        if current.is_some_and(|current| current >= to) {
            return Ok(());
        }

        self.checkpoints
            .save_checkpoint(&self.config.checkpoint_key, to)
            .await?;
        debug!(key = %self.config.checkpoint_key, cursor = %to, "Advanced checkpoint");

        Ok(())
    }
}
