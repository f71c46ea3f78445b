//! Invalidation events and their stream-entry wire shape
//!
//! ```text
//! event = "invalidate"
//! key   = <invalidated cache key>
//! ```

use kvstore::{EventId, Fields, StreamEntry};

/// Field holding the event kind
pub const EVENT_FIELD: &str = "event";

/// Field holding the invalidated key
pub const KEY_FIELD: &str = "key";

/// Kind tag of invalidation events
pub const INVALIDATE: &str = "invalidate";

/// A cache key invalidated by a write, as read back from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    /// Log-assigned id
    pub id: EventId,
    /// Invalidated cache key
    pub key: String,
}

impl InvalidationEvent {
    /// Fields to append for an invalidation of `key`
    pub fn fields(key: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert(EVENT_FIELD.to_string(), INVALIDATE.to_string());
        fields.insert(KEY_FIELD.to_string(), key.to_string());
        fields
    }

    /// Decode a stream entry; `None` unless it is a well-formed invalidation
    pub fn from_entry(entry: &StreamEntry) -> Option<Self> {
        if entry.field(EVENT_FIELD)? != INVALIDATE {
            return None;
        }

        Some(Self {
            id: entry.id,
            key: entry.field(KEY_FIELD)?.to_string(),
        })
    }
}
