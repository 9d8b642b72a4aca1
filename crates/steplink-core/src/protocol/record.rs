//! Current-set record tokenizer
//!
//! The `Z|` dump packs twelve fields into one line with no separators other
//! than the field tags themselves:
//!
//! ```text
//! 1Zp+1s-400u+400o+1000n+1000b+2364B+0d+0t+0W+1P+0N+0
//! ```
//!
//! Tags are case sensitive and always appear in the same order, so each field
//! runs from the end of its tag to the start of the next one.

use serde::Serialize;

use super::error::MalformedReason;
use super::response::{parse_int, position_mode_name};
use super::TERMINATOR;

/// Record tags in wire order, with the field each one carries
pub const RECORD_FIELDS: [(&str, &str); 12] = [
    ("p", "position_mode"),
    ("s", "travel_distance"),
    ("u", "min_frequency"),
    ("o", "max_frequency"),
    ("n", "max_frequency2"),
    ("b", "accel_ramp"),
    ("B", "brake_ramp"),
    ("d", "direction"),
    ("t", "direction_change"),
    ("W", "repeats"),
    ("P", "pause"),
    ("N", "next_record"),
];

/// Byte span of one field value inside a record payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    /// Tag that introduces the field
    pub tag: &'static str,
    /// Offset of the first value byte
    pub start: usize,
    /// Offset one past the last value byte
    pub end: usize,
}

/// One decoded record field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordField {
    /// Wire tag, e.g. `s`
    pub tag: &'static str,
    /// Readable name, e.g. `travel_distance`
    pub name: &'static str,
    /// Decoded value
    pub value: i32,
    /// Only set for the position mode field
    pub description: Option<&'static str>,
}

/// The controller's active motion record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    fields: Vec<RecordField>,
}

impl Record {
    /// Fields in wire order
    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    /// Value of the field introduced by `tag`
    pub fn get(&self, tag: &str) -> Option<i32> {
        self.fields.iter().find(|f| f.tag == tag).map(|f| f.value)
    }

    /// Value of the field called `name`
    pub fn by_name(&self, name: &str) -> Option<i32> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value)
    }

    /// Description of the record's position mode
    pub fn position_mode(&self) -> Option<&'static str> {
        self.fields.first().and_then(|f| f.description)
    }
}

fn locate(payload: &str, from: usize, tag: &'static str) -> Result<usize, MalformedReason> {
    payload[from..]
        .find(tag)
        .map(|p| from + p)
        .ok_or(MalformedReason::MissingTag(tag))
}

/// Find the value span of every record field, in tag order.
///
/// Fails on the first tag that cannot be found after its predecessor.
pub fn tokenize(payload: &str) -> Result<Vec<FieldSpan>, MalformedReason> {
    let mut spans = Vec::with_capacity(RECORD_FIELDS.len());
    let mut tag_pos = locate(payload, 0, RECORD_FIELDS[0].0)?;

    for (i, &(tag, _)) in RECORD_FIELDS.iter().enumerate() {
        let start = tag_pos + tag.len();
        let end = match RECORD_FIELDS.get(i + 1) {
            Some(&(next, _)) => locate(payload, start, next)?,
            None => payload[start..]
                .find(TERMINATOR)
                .map(|p| start + p)
                .unwrap_or(payload.len()),
        };
        spans.push(FieldSpan { tag, start, end });
        tag_pos = end;
    }

    Ok(spans)
}

/// Decode a record payload into typed fields
pub fn parse_record(payload: &str) -> Result<Record, MalformedReason> {
    let spans = tokenize(payload)?;
    let mut fields = Vec::with_capacity(spans.len());

    for (span, &(_, name)) in spans.iter().zip(RECORD_FIELDS.iter()) {
        let text = &payload[span.start..span.end];
        let value = parse_int(text).map_err(|_| MalformedReason::BadField {
            tag: span.tag,
            value: text.to_string(),
        })?;
        let description = (span.tag == "p").then(|| position_mode_name(value));
        fields.push(RecordField {
            tag: span.tag,
            name,
            value,
            description,
        });
    }

    Ok(Record { fields })
}
