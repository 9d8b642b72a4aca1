//! Frame building and echo stripping
//!
//! Request frames have the form
//!
//! ```text
//! "#" <address> <mnemonic> [<signed decimal argument>] "\r"
//! ```
//!
//! where the address is `1`..`254` without leading zeros, or `*` for broadcast.
//! Controllers answer with the address and mnemonic echoed ahead of the payload
//! and the same `\r` terminator.

use std::fmt;
use std::str::FromStr;

use super::error::MalformedReason;
use super::{Command, Mnemonic, ProtocolError, START_MARKER, TERMINATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Unit(u8),
    Broadcast,
}

/// Bus address of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(Target);

impl Address {
    /// Addresses every controller on the line (`*`)
    pub const BROADCAST: Address = Address(Target::Broadcast);

    /// Create a unit address in `1..=254`
    pub fn new(unit: u8) -> Result<Self, ProtocolError> {
        if (1..=254).contains(&unit) {
            Ok(Address(Target::Unit(unit)))
        } else {
            Err(ProtocolError::InvalidArgument(format!(
                "address {} outside 1..=254",
                unit
            )))
        }
    }

    /// Unit number, `None` for broadcast
    pub fn unit(&self) -> Option<u8> {
        match self.0 {
            Target::Unit(n) => Some(n),
            Target::Broadcast => None,
        }
    }

    /// True for `*`
    pub fn is_broadcast(&self) -> bool {
        self.0 == Target::Broadcast
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Target::Unit(n) => write!(f, "{}", n),
            Target::Broadcast => f.write_str("*"),
        }
    }
}

impl TryFrom<u8> for Address {
    type Error = ProtocolError;

    fn try_from(unit: u8) -> Result<Self, Self::Error> {
        Address::new(unit)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Address::BROADCAST);
        }
        if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidArgument(format!(
                "'{}' is not a controller address",
                s
            )));
        }
        let unit: u8 = s
            .parse()
            .map_err(|_| ProtocolError::InvalidArgument(format!("address '{}' too large", s)))?;
        Address::new(unit)
    }
}

/// One complete wire request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    /// Request text including start marker and terminator
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes to put on the wire
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Frame length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for a built frame
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.escape_default().to_string())
    }
}

/// Build the request frame for `command` addressed to `address`
pub fn build(address: Address, command: &Command) -> Result<Frame, ProtocolError> {
    command.validate()?;

    let mut frame = String::with_capacity(16);
    frame.push(START_MARKER);
    frame.push_str(&address.to_string());
    frame.push_str(command.mnemonic().token());
    if let Some(arg) = command.argument() {
        frame.push_str(&arg.to_string());
    }
    frame.push(TERMINATOR);

    Ok(Frame(frame))
}

/// Whether `token` can be framed as a free-form command.
///
/// ASCII alphanumerics plus the `$` and `|` used by the status and record
/// reads. Anything that could terminate or re-address the frame is refused.
fn is_raw_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'$' || b == b'|')
}

/// Build a frame for a command outside the known vocabulary, e.g. `J1`.
///
/// Only the token's characters are checked; there is no range to validate.
pub fn build_raw(
    address: Address,
    token: &str,
    argument: Option<i32>,
) -> Result<Frame, ProtocolError> {
    if !is_raw_token(token) {
        return Err(ProtocolError::InvalidArgument(format!(
            "'{}' is not a valid command token",
            token.escape_default()
        )));
    }

    let mut frame = String::with_capacity(16);
    frame.push(START_MARKER);
    frame.push_str(&address.to_string());
    frame.push_str(token);
    if let Some(arg) = argument {
        frame.push_str(&arg.to_string());
    }
    frame.push(TERMINATOR);

    Ok(Frame(frame))
}

/// Locate the echo of `mnemonic` and return everything after it, up to the
/// terminator. The result may be empty.
pub fn after_echo(raw: &str, mnemonic: Mnemonic) -> Result<&str, ProtocolError> {
    let marker = mnemonic.echo_marker();
    let start = raw.find(marker).ok_or_else(|| {
        ProtocolError::malformed(MalformedReason::MissingEcho(marker.to_string()), raw)
    })?;
    let rest = &raw[start + marker.len()..];
    let end = rest.find(TERMINATOR).unwrap_or(rest.len());
    Ok(rest[..end].trim_end_matches(['\n', '\0']))
}

/// Strip the echoed address/mnemonic prefix and the terminator from a response.
///
/// An echo followed directly by the terminator is reported as
/// [`MalformedReason::EmptyPayload`], distinct from a missing echo.
pub fn strip_echo(raw: &str, mnemonic: Mnemonic) -> Result<&str, ProtocolError> {
    let payload = after_echo(raw, mnemonic)?;
    if payload.is_empty() {
        return Err(ProtocolError::malformed(
            MalformedReason::EmptyPayload(mnemonic.echo_marker().to_string()),
            raw,
        ));
    }
    Ok(payload)
}

/// Response text with the start marker and terminator removed
pub fn trim_frame(raw: &str) -> &str {
    let body = raw.strip_prefix(START_MARKER).unwrap_or(raw);
    let end = body.find(TERMINATOR).unwrap_or(body.len());
    body[..end].trim_end_matches(['\n', '\0'])
}
