//! Response decoding
//!
//! Turns raw controller replies into [`ParsedValue`]s. The shape of the value
//! is decided by the mnemonic that was sent, never by looking at the payload.

use serde::Serialize;
use tracing::warn;

use super::error::MalformedReason;
use super::framer::{after_echo, strip_echo, trim_frame};
use super::record::{parse_record, Record};
use super::{Mnemonic, ProtocolError, ResponseShape};

/// Returned for position mode indices the table does not cover
pub const UNRECOGNIZED_MODE: &str = "unrecognized mode";

/// Position modes 1..=19 as documented for the `p` command
const POSITION_MODES: [&str; 19] = [
    "relative pos. mode",
    "absolute pos. mode",
    "internal reference run",
    "external reference run",
    "speed mode",
    "flag pos. mode",
    "clock direction mode, left",
    "clock direction mode, right",
    "clock direction mode, internal reference run",
    "clock direction mode, external reference run",
    "analog speed mode",
    "joystick mode",
    "analog pos. mode",
    "HW reference mode",
    "torque mode",
    "CL quick test mode",
    "CL test mode",
    "CL autotune mode",
    "CL quick test mode 2",
];

/// Decoded controller reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParsedValue {
    /// Scalar reads and write echoes
    Integer(i32),
    /// Status clauses, mode names, firmware version and acknowledgements
    Text(String),
    /// `Z|` dump
    Record(Record),
}

impl ParsedValue {
    /// The integer, if this is one
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            ParsedValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The text, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParsedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The record, if this is one
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            ParsedValue::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// Parse a base-10 signed integer, allowing an explicit `+`
pub fn parse_int(text: &str) -> Result<i32, MalformedReason> {
    let trimmed = text.trim();
    trimmed
        .parse::<i32>()
        .map_err(|_| MalformedReason::NotAnInteger(trimmed.to_string()))
}

/// Description for a position mode index
pub fn position_mode_name(mode: i32) -> &'static str {
    usize::try_from(mode)
        .ok()
        .and_then(|m| m.checked_sub(1))
        .and_then(|i| POSITION_MODES.get(i))
        .copied()
        .unwrap_or(UNRECOGNIZED_MODE)
}

/// Clauses describing a status word, in bit order.
///
/// Bit 0 reports ready/busy either way. Bits 1-3 only speak when set. Bits 4-7
/// are reserved and should never be set; when they are, the word is flagged as
/// inconsistent instead of being dropped.
pub fn status_clauses(word: i32) -> Vec<String> {
    let mut clauses = Vec::new();

    if word & 0x01 != 0 {
        clauses.push("controller ready".to_string());
    } else {
        clauses.push("controller busy".to_string());
    }
    if word & 0x02 != 0 {
        clauses.push("zero position reached".to_string());
    }
    if word & 0x04 != 0 {
        clauses.push("position error".to_string());
    }
    if word & 0x08 != 0 {
        clauses.push("input 1 set while controller was ready again".to_string());
    }
    for bit in 4..8 {
        if word & (1 << bit) != 0 {
            clauses.push(format!("reserved bit {} set (inconsistent status)", bit));
        }
    }
    if !(0..=0xFF).contains(&word) {
        clauses.push(format!(
            "status word {} exceeds 8 bits (inconsistent status)",
            word
        ));
    }

    clauses
}

/// Status word rendered as one `"; "`-joined description
pub fn describe_status(word: i32) -> String {
    let clauses = status_clauses(word);
    if clauses.iter().any(|c| c.contains("inconsistent")) {
        warn!("controller reported inconsistent status word {:#04x}", word);
    }
    clauses.join("; ")
}

fn with_raw<T>(result: Result<T, MalformedReason>, raw: &str) -> Result<T, ProtocolError> {
    result.map_err(|reason| ProtocolError::malformed(reason, raw))
}

/// Decode a raw reply to `mnemonic`
pub fn parse_response(raw: &str, mnemonic: Mnemonic) -> Result<ParsedValue, ProtocolError> {
    match mnemonic.response_shape() {
        ResponseShape::Acknowledge => {
            after_echo(raw, mnemonic)?;
            Ok(ParsedValue::Text(trim_frame(raw).to_string()))
        }
        ResponseShape::Scalar => {
            let payload = strip_echo(raw, mnemonic)?;
            with_raw(parse_int(payload), raw).map(ParsedValue::Integer)
        }
        ResponseShape::Status => {
            let payload = strip_echo(raw, mnemonic)?;
            let word = with_raw(parse_int(payload), raw)?;
            Ok(ParsedValue::Text(describe_status(word)))
        }
        ResponseShape::PositionMode => {
            let payload = strip_echo(raw, mnemonic)?;
            let mode = with_raw(parse_int(payload), raw)?;
            Ok(ParsedValue::Text(position_mode_name(mode).to_string()))
        }
        ResponseShape::Text => {
            let payload = strip_echo(raw, mnemonic)?.trim();
            if payload.is_empty() {
                return Err(ProtocolError::malformed(
                    MalformedReason::EmptyPayload(mnemonic.echo_marker().to_string()),
                    raw,
                ));
            }
            Ok(ParsedValue::Text(payload.to_string()))
        }
        ResponseShape::Record => {
            let payload = strip_echo(raw, mnemonic)?;
            with_raw(parse_record(payload), raw).map(ParsedValue::Record)
        }
    }
}
