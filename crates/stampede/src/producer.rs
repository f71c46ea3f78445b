//! Invalidation log producer
//!
//! Appends one event per invalidated key and keeps the log bounded. Runs
//! after the authoritative write; the two are not atomic, so an append that
//! fails after a successful write loses that invalidation.

use std::sync::Arc;

use kvstore::{EventId, LogService, Result};
use tracing::debug;

use crate::config::LogConfig;
use crate::event::InvalidationEvent;

/// Result of trimming the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimReport {
    /// Entries dropped by this trim
    pub removed: usize,
    /// Entries left in the log
    pub retained: usize,
    /// Configured bound
    pub max_len: usize,
    /// Whether the log was allowed to trim lazily
    pub approximate: bool,
}

impl TrimReport {
    /// True when an approximate trim left more than `max_len` entries
    pub fn over_bound(&self) -> bool {
        self.retained > self.max_len
    }
}

/// Result of [`InvalidationLogProducer::record_and_trim`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Id of the appended event
    pub id: EventId,
    /// What the following trim did
    pub trim: TrimReport,
}

/// Appends invalidation events to a bounded log
pub struct InvalidationLogProducer<L: ?Sized> {
    log: Arc<L>,
    config: LogConfig,
}

impl<L> InvalidationLogProducer<L>
where
    L: LogService + ?Sized,
{
    /// Create a producer writing to `config.stream`
    pub fn new(log: Arc<L>, config: LogConfig) -> Self {
        Self { log, config }
    }

    /// Get the log configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Append an invalidation of `key`, then trim the log to its bound
    ///
    /// # Returns
    /// * `Result<RecordOutcome>` - Event id and trim report
    pub async fn record_and_trim(&self, key: &str) -> Result<RecordOutcome> {
        let id = self.record(key).await?;
        let trim = self.trim().await?;

        Ok(RecordOutcome { id, trim })
    }

    /// Append an invalidation of `key` without trimming
    pub async fn record(&self, key: &str) -> Result<EventId> {
        let id = self
            .log
            .append(&self.config.stream, InvalidationEvent::fields(key))
            .await?;

        debug!(stream = %self.config.stream, key, %id, "Recorded invalidation");
        Ok(id)
    }

    /// Trim the log to `config.max_len`
    pub async fn trim(&self) -> Result<TrimReport> {
        let stream = &self.config.stream;
        let removed = self
            .log
            .trim(stream, self.config.max_len, self.config.approximate_trim)
            .await?;
        let retained = self.log.len(stream).await?;

        let report = TrimReport {
            removed,
            retained,
            max_len: self.config.max_len,
            approximate: self.config.approximate_trim,
        };

        if report.over_bound() {
            debug!(stream = %stream, retained, max_len = report.max_len, "Log above bound after approximate trim");
        }

        Ok(report)
    }
}
