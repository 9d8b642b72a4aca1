//! Request/response exchange
//!
//! One exchange is: build the frame, lock the channel, discard stale input,
//! send, wait for the reply, unlock, parse. The lock covers exactly the I/O so
//! replies can never be attributed to another caller's request.

use std::sync::Mutex;
use std::time::Duration;
use tracing::trace;

use super::channel::Channel;
use super::framer::{self, Address, Frame};
use super::response::{parse_response, ParsedValue};
use super::transport::{self, RawResponse};
use super::{Command, Mnemonic, ProtocolError};

/// Progress of a single exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing done yet
    Idle,
    /// Request validated and framed
    FrameBuilt,
    /// Frame written and drained
    Sent,
    /// Waiting for the terminator
    AwaitingResponse,
    /// Reply decoded
    Parsed,
    /// No reply within the deadline
    TimedOut,
    /// Reply arrived but could not be decoded
    Malformed,
    /// Local validation, handle or I/O failure
    Failed,
}

impl ExchangeState {
    /// Whether the exchange has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeState::Parsed
                | ExchangeState::TimedOut
                | ExchangeState::Malformed
                | ExchangeState::Failed
        )
    }
}

/// Flush, send and receive under the channel lock.
///
/// `on_sent` runs once the frame has been drained, before the reply wait.
fn round_trip<F>(
    channel: &Mutex<Channel>,
    frame: &Frame,
    timeout: Duration,
    on_sent: F,
) -> Result<RawResponse, ProtocolError>
where
    F: FnOnce(),
{
    let mut guard = channel.lock().map_err(|_| ProtocolError::LockPoisoned)?;
    let write_timeout = guard.config().write_timeout();

    transport::flush_input(&mut guard)?;
    transport::send(&mut guard, frame, write_timeout)?;
    on_sent();

    transport::receive_frame(&mut guard, timeout)
}

/// A single request and its reply
#[derive(Debug)]
pub struct Exchange {
    address: Address,
    command: Command,
    state: ExchangeState,
}

impl Exchange {
    /// Prepare an exchange; nothing is validated or sent until [`run`](Self::run)
    pub fn new(address: Address, command: Command) -> Self {
        Self {
            address,
            command,
            state: ExchangeState::Idle,
        }
    }

    /// Current position in the exchange
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    fn advance(&mut self, next: ExchangeState) {
        trace!(
            "#{}{}: {:?} -> {:?}",
            self.address,
            self.command.mnemonic(),
            self.state,
            next
        );
        self.state = next;
    }

    /// Run the exchange to a terminal state.
    ///
    /// `timeout` bounds the wait for the reply; transmit readiness uses the
    /// channel's configured write timeout. Nothing is retried.
    pub fn run(
        &mut self,
        channel: &Mutex<Channel>,
        timeout: Duration,
    ) -> Result<ParsedValue, ProtocolError> {
        let result = self
            .transact(channel, timeout)
            .and_then(|raw| parse_response(&raw.text(), self.command.mnemonic()));

        let terminal = match &result {
            Ok(_) => ExchangeState::Parsed,
            Err(ProtocolError::Timeout) => ExchangeState::TimedOut,
            Err(ProtocolError::MalformedResponse { .. }) => ExchangeState::Malformed,
            Err(_) => ExchangeState::Failed,
        };
        self.advance(terminal);
        result
    }

    fn transact(
        &mut self,
        channel: &Mutex<Channel>,
        timeout: Duration,
    ) -> Result<RawResponse, ProtocolError> {
        let frame = framer::build(self.address, &self.command)?;
        self.advance(ExchangeState::FrameBuilt);

        round_trip(channel, &frame, timeout, || {
            self.advance(ExchangeState::Sent);
            self.advance(ExchangeState::AwaitingResponse);
        })
    }
}

/// Send one command and parse the reply according to `mnemonic`.
pub fn send_command(
    channel: &Mutex<Channel>,
    address: Address,
    mnemonic: Mnemonic,
    argument: Option<i32>,
    timeout: Duration,
) -> Result<ParsedValue, ProtocolError> {
    let command = match argument {
        Some(arg) => Command::with_argument(mnemonic, arg),
        None => Command::new(mnemonic),
    };
    Exchange::new(address, command).run(channel, timeout)
}

/// Send a free-form command token and return the reply unparsed.
///
/// For firmware commands the vocabulary does not cover (`J1`, `J0`, ...).
/// The token is checked before the channel is touched; the reply must still
/// arrive terminated within `timeout`.
pub fn send_raw(
    channel: &Mutex<Channel>,
    address: Address,
    token: &str,
    argument: Option<i32>,
    timeout: Duration,
) -> Result<RawResponse, ProtocolError> {
    let frame = framer::build_raw(address, token, argument)?;
    trace!("raw exchange {}", frame);
    round_trip(channel, &frame, timeout, || {})
}
