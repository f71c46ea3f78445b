//! Invalidation log configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default stream name
pub const DEFAULT_STREAM: &str = "cache-invalidation";

/// Default maximum retained events
pub const DEFAULT_MAX_LEN: usize = 1000;

/// Default checkpoint key
pub const DEFAULT_CHECKPOINT_KEY: &str = "cache-invalidation:checkpoint";

/// Names and bounds of an invalidation log, supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Stream the events are appended to
    pub stream: String,

    /// Maximum number of retained events
    pub max_len: usize,

    /// Key holding the consumer cursor
    pub checkpoint_key: String,

    /// Let the log trim lazily (may retain a few more than `max_len`)
    pub approximate_trim: bool,

    /// How long a read waits for new events before returning empty
    pub block_timeout_ms: u64,

    /// Maximum events returned by one read
    pub batch_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            max_len: DEFAULT_MAX_LEN,
            checkpoint_key: DEFAULT_CHECKPOINT_KEY.to_string(),
            approximate_trim: true,
            block_timeout_ms: 100,
            batch_size: 100,
        }
    }
}

impl LogConfig {
    /// Config for the named stream with default bounds
    pub fn for_stream(stream: impl Into<String>) -> Self {
        let stream = stream.into();
        Self {
            checkpoint_key: format!("{stream}:checkpoint"),
            stream,
            ..Self::default()
        }
    }

    /// Set the maximum retained length
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Set the checkpoint key
    pub fn with_checkpoint_key(mut self, key: impl Into<String>) -> Self {
        self.checkpoint_key = key.into();
        self
    }

    /// Set the read wait
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the read batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Read wait as a duration
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}
