//! # kvstore
//!
//! Capability interfaces for the collaborators of the stampede cache and the
//! invalidation log, plus an embedded store implementing all of them.
//!
//! ## Interfaces
//! - **KvBackend**: `ping`, `get`, `set`
//! - **LogService**: `append`, `trim`, `read`, `range`, `len` on named streams
//! - **CheckpointStore**: persisted consumer cursors; every `KvBackend` is one
//!
//! ## Embedded store
//! - Memory-only or snapshot-to-directory
//! - Monotonic `<millis>-<seq>` entry ids
//! - Exact or chunked (approximate) trimming

#![warn(missing_docs)]

mod backend;
mod error;
mod id;
mod parser;
mod store;

pub use backend::{CheckpointStore, Fields, KvBackend, LogService, StreamEntry};
pub use error::{BoxError, Error, Result};
pub use id::{cursor_to_string, EventId};
pub use parser::parse_cursor;
pub use store::{EmbeddedStore, FailPoint};
