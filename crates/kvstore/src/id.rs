//! Log-assigned event identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::parser::parse_event_id;

/// Identifier of a stream entry: `<millis>-<seq>`
///
/// Ordered by milliseconds first, then by sequence number. Ids assigned by a
/// single log strictly increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    ms: u64,
    seq: u64,
}

impl EventId {
    /// The `0-0` id; sorts before every id a log can assign
    pub const ZERO: EventId = EventId { ms: 0, seq: 0 };

    /// Create an id from its parts
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Millisecond part
    pub fn ms(&self) -> u64 {
        self.ms
    }

    /// Sequence part
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True for `0-0`
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Next id to assign after `last`, given the current clock reading
    ///
    /// Uses the clock when it moved forward, otherwise bumps the sequence of
    /// `last`, so ids keep increasing even if the clock stalls or goes back.
    pub fn next_after(last: Option<EventId>, now_ms: u64) -> EventId {
        match last {
            Some(last) if now_ms <= last.ms => EventId::new(last.ms, last.seq + 1),
            _ if now_ms == 0 => EventId::new(0, 1),
            _ => EventId::new(now_ms, 0),
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_event_id(s)
    }
}

/// Render a cursor; "no cursor" is written as `0-0`
pub fn cursor_to_string(cursor: Option<EventId>) -> String {
    cursor.unwrap_or(EventId::ZERO).to_string()
}
