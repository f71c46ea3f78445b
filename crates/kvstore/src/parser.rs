//! Stream entry id parser using nom
//!
//! Grammar:
//! ```text
//! id     = millis [ "-" seq ]
//! millis = 1*DIGIT
//! seq    = 1*DIGIT
//! ```
//!
//! A bare `millis` means sequence 0. Cursor text additionally accepts the
//! empty string as "no cursor".

use nom::{
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt},
    sequence::{pair, preceded},
    IResult,
};

use crate::error::{Error, Result};
use crate::id::EventId;

fn number(input: &str) -> IResult<&str, u64> {
    map_res(digit1, |digits: &str| digits.parse::<u64>())(input)
}

/// Parse the `millis[-seq]` form, leaving any trailing input untouched
pub fn event_id(input: &str) -> IResult<&str, EventId> {
    let (rest, (ms, seq)) = pair(number, opt(preceded(char('-'), number)))(input)?;
    Ok((rest, EventId::new(ms, seq.unwrap_or(0))))
}

/// Parse a complete id; surrounding whitespace is ignored
pub fn parse_event_id(input: &str) -> Result<EventId> {
    all_consuming(event_id)(input.trim())
        .map(|(_, id)| id)
        .map_err(|_| Error::InvalidEventId(input.to_string()))
}

/// Parse cursor text; empty, `0` and `0-0` all mean "start of history"
pub fn parse_cursor(input: &str) -> Result<Option<EventId>> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    let id = parse_event_id(input)?;
    Ok(if id.is_zero() { None } else { Some(id) })
}
