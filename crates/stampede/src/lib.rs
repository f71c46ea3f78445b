//! # stampede
//!
//! In-process cache that collapses concurrent misses into one load, and a
//! bounded invalidation log for telling other processes which keys changed.
//!
//! ## Architecture
//! - **LockTable**: one async mutex per key, created once, never removed
//! - **StampedeCache**: double-checked lookups over an AHash map
//! - **InvalidationLogProducer**: append then (approximately) trim
//! - **InvalidationLogConsumer**: cursor reads with a persisted checkpoint
//! - **Context**: explicit store handle instead of a global client

#![warn(missing_docs)]

mod cache;
mod config;
mod consumer;
mod context;
mod event;
mod lock_table;
mod producer;
mod stats;

pub use cache::StampedeCache;
pub use config::{LogConfig, DEFAULT_CHECKPOINT_KEY, DEFAULT_MAX_LEN, DEFAULT_STREAM};
pub use consumer::{Batch, InvalidationLogConsumer};
pub use context::Context;
pub use event::{InvalidationEvent, EVENT_FIELD, INVALIDATE, KEY_FIELD};
pub use lock_table::{KeyGuard, KeyLock, LockTable};
pub use producer::{InvalidationLogProducer, RecordOutcome, TrimReport};
pub use stats::CacheStats;

pub use kvstore::{Error, EventId, Result};
