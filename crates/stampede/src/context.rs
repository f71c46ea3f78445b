//! Explicit handle to the backing store and log configuration
//!
//! Built once and passed to whatever needs backend or log access, instead of
//! a process-wide client. Several contexts over different stores can live in
//! one process.

use std::sync::Arc;

use kvstore::{Error, KvBackend, LogService, Result};
use tracing::warn;

use crate::config::LogConfig;
use crate::consumer::InvalidationLogConsumer;
use crate::producer::{InvalidationLogProducer, RecordOutcome};

/// Store plus invalidation log settings
pub struct Context<S> {
    store: Arc<S>,
    config: LogConfig,
}

impl<S> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S> Context<S>
where
    S: KvBackend + LogService,
{
    /// Create a context over `store`
    pub fn new(store: Arc<S>, config: LogConfig) -> Self {
        Self { store, config }
    }

    /// Get the backing store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the log configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Producer for this context's log
    pub fn producer(&self) -> InvalidationLogProducer<S> {
        InvalidationLogProducer::new(Arc::clone(&self.store), self.config.clone())
    }

    /// Consumer for this context's log, checkpointing in the same store
    pub fn consumer(&self) -> InvalidationLogConsumer<S, S> {
        InvalidationLogConsumer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.store),
            self.config.clone(),
        )
    }

    /// Probe the backend
    pub async fn ping(&self) -> Result<bool> {
        self.store.ping().await
    }

    /// Read a value from the backend
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }

    /// Write `value`, then record and trim an invalidation of `key`
    ///
    /// Not atomic. If the write succeeds but the append fails, the value is
    /// stored, no event exists, and `Error::InvalidationLost` is returned so
    /// the caller can tell this apart from a failed write.
    pub async fn set_and_record(&self, key: &str, value: &[u8]) -> Result<RecordOutcome> {
        self.store.set(key, value).await?;

        let producer = self.producer();
        let id = producer.record(key).await.map_err(|source| {
            warn!(key, error = %source, "Write stored but invalidation not recorded");
            Error::InvalidationLost {
                key: key.to_string(),
                source: Box::new(source),
            }
        })?;
        let trim = producer.trim().await?;

        Ok(RecordOutcome { id, trim })
    }
}
