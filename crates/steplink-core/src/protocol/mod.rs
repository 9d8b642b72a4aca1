//! Serial Protocol Communication
//!
//! Implements the Nanotec ASCII command protocol: one `\r`-terminated request
//! per exchange, answered by one `\r`-terminated reply echoing the address and
//! mnemonic.

mod channel;
pub mod commands;
mod engine;
mod error;
pub mod framer;
mod link;
pub mod record;
pub mod response;
pub mod transport;

pub use channel::{Channel, ChannelConfig, CharSize, LineMode, Parity, SharedChannel, StopBits};
pub use commands::{Access, ArgumentRule, Command, Mnemonic, ResponseShape};
pub use engine::{send_command, send_raw, Exchange, ExchangeState};
pub use error::{MalformedReason, ProtocolError};
pub use framer::{Address, Frame};
pub use link::Link;
pub use record::{Record, RecordField};
pub use response::{parse_response, ParsedValue};
pub use transport::RawResponse;

/// First byte of every request frame
pub const START_MARKER: char = '#';

/// Last byte of every request and reply
pub const TERMINATOR: char = '\r';

/// Default baud rate for controller communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default response deadline in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default deadline for transmit readiness in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 100;

/// Upper bound on the bytes kept for one reply
pub const MAX_RESPONSE_SIZE: usize = 80;
