//! Typed controller handles
//!
//! A [`Controller`] is a channel plus a bus address. Several controllers on one
//! RS-485 line share the same [`SharedChannel`]; the channel lock keeps their
//! exchanges from interleaving.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::protocol::{
    send_command, send_raw, Address, MalformedReason, Mnemonic, ParsedValue, ProtocolError,
    RawResponse, Record, ResponseShape, SharedChannel,
};

/// How the motor should come to a halt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Use the controller's default stop behavior (`S`)
    Default,
    /// Stop immediately (`S0`)
    Quick,
    /// Decelerate along the brake ramp (`S1`)
    Ramp,
}

impl StopMode {
    /// Argument sent with `S`, if any
    fn argument(self) -> Option<i32> {
        match self {
            StopMode::Default => None,
            StopMode::Quick => Some(0),
            StopMode::Ramp => Some(1),
        }
    }
}

/// One controller reachable over a shared channel
#[derive(Debug, Clone)]
pub struct Controller {
    channel: SharedChannel,
    address: Address,
}

fn unexpected_shape(expected: &'static str, value: &ParsedValue) -> ProtocolError {
    ProtocolError::malformed(
        MalformedReason::UnexpectedShape { expected },
        format!("{:?}", value),
    )
}

fn expect_integer(value: ParsedValue) -> Result<i32, ProtocolError> {
    match value {
        ParsedValue::Integer(v) => Ok(v),
        other => Err(unexpected_shape("an integer", &other)),
    }
}

fn expect_text(value: ParsedValue) -> Result<String, ProtocolError> {
    match value {
        ParsedValue::Text(text) => Ok(text),
        other => Err(unexpected_shape("text", &other)),
    }
}

fn expect_record(value: ParsedValue) -> Result<Record, ProtocolError> {
    match value {
        ParsedValue::Record(record) => Ok(record),
        other => Err(unexpected_shape("a record", &other)),
    }
}

impl Controller {
    /// Handle for the controller at `address` on `channel`
    pub fn new(channel: SharedChannel, address: Address) -> Self {
        Self { channel, address }
    }

    /// Assign `new_address` to the single controller attached to `channel`.
    ///
    /// The request goes to the broadcast address, so every controller on the
    /// line takes the new address. Only use it with one controller connected.
    pub fn assign_address(
        channel: SharedChannel,
        new_address: u8,
    ) -> Result<Self, ProtocolError> {
        let address = Address::new(new_address)?;
        let broadcast = Controller::new(Arc::clone(&channel), Address::BROADCAST);
        broadcast.execute(Mnemonic::SetMotorAddress, Some(i32::from(new_address)))?;
        debug!("assigned bus address {}", address);
        Ok(Controller::new(channel, address))
    }

    /// Bus address every request is sent to
    pub fn address(&self) -> Address {
        self.address
    }

    /// Channel this controller shares with its neighbours on the line
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    /// Reply deadline: the channel's configured read timeout, stretched for
    /// commands with long replies
    fn response_timeout(&self, mnemonic: Mnemonic) -> Duration {
        let configured = self
            .channel
            .lock()
            .map(|c| c.config().read_timeout())
            .unwrap_or(Duration::ZERO);
        configured.max(mnemonic.timeout())
    }

    /// Run one command with the default reply deadline
    pub fn execute(
        &self,
        mnemonic: Mnemonic,
        argument: Option<i32>,
    ) -> Result<ParsedValue, ProtocolError> {
        self.execute_with_timeout(mnemonic, argument, self.response_timeout(mnemonic))
    }

    /// Run one command, waiting at most `timeout` for the reply
    pub fn execute_with_timeout(
        &self,
        mnemonic: Mnemonic,
        argument: Option<i32>,
        timeout: Duration,
    ) -> Result<ParsedValue, ProtocolError> {
        send_command(&self.channel, self.address, mnemonic, argument, timeout)
    }

    /// Send a command token outside the known vocabulary, returning the raw reply
    pub fn send_raw(
        &self,
        token: &str,
        argument: Option<i32>,
    ) -> Result<RawResponse, ProtocolError> {
        let timeout = self
            .channel
            .lock()
            .map(|c| c.config().read_timeout())
            .unwrap_or(Duration::ZERO);
        send_raw(&self.channel, self.address, token, argument, timeout)
    }

    /// Read an integer-valued setting
    pub fn read(&self, mnemonic: Mnemonic) -> Result<i32, ProtocolError> {
        if !mnemonic.is_readable() || mnemonic.response_shape() != ResponseShape::Scalar {
            return Err(ProtocolError::InvalidArgument(format!(
                "'{}' is not an integer read",
                mnemonic
            )));
        }
        let value = self.execute(mnemonic, None)?;
        expect_integer(value)
    }

    /// Store a setting, returning the value the controller echoed
    pub fn write(&self, mnemonic: Mnemonic, value: i32) -> Result<i32, ProtocolError> {
        if !mnemonic.is_writable() {
            return Err(ProtocolError::InvalidArgument(format!(
                "'{}' is not writable",
                mnemonic
            )));
        }
        let echoed = self.execute(mnemonic, Some(value))?;
        expect_integer(echoed)
    }

    /// Start a run with the current record; returns the acknowledgement text
    pub fn start(&self) -> Result<String, ProtocolError> {
        let value = self.execute(Mnemonic::StartMotor, None)?;
        expect_text(value)
    }

    /// Halt the motor; returns the acknowledgement text
    pub fn stop(&self, mode: StopMode) -> Result<String, ProtocolError> {
        let value = self.execute(Mnemonic::StopMotor, mode.argument())?;
        expect_text(value)
    }

    /// Current position in steps
    pub fn position(&self) -> Result<i32, ProtocolError> {
        self.read(Mnemonic::ReadPosition)
    }

    /// Status word rendered as descriptive clauses
    pub fn status(&self) -> Result<String, ProtocolError> {
        let value = self.execute(Mnemonic::ReadStatus, None)?;
        expect_text(value)
    }

    /// Firmware identification string
    pub fn firmware_version(&self) -> Result<String, ProtocolError> {
        let value = self.execute(Mnemonic::ReadFirmwareVersion, None)?;
        expect_text(value)
    }

    /// Description of the active position mode
    pub fn position_mode(&self) -> Result<String, ProtocolError> {
        let value = self.execute(Mnemonic::ReadPositionMode, None)?;
        expect_text(value)
    }

    /// Select the position mode by its numeric code
    pub fn set_position_mode(&self, mode: i32) -> Result<i32, ProtocolError> {
        self.write(Mnemonic::SetPositionMode, mode)
    }

    /// Dump of the complete active record
    pub fn current_set(&self) -> Result<Record, ProtocolError> {
        let value = self.execute(Mnemonic::ReadCurrentSet, None)?;
        expect_record(value)
    }

    /// Travel distance of the active record in steps
    pub fn travel_distance(&self) -> Result<i32, ProtocolError> {
        self.read(Mnemonic::ReadTravelDistance)
    }

    /// Store the travel distance in steps
    pub fn set_travel_distance(&self, steps: i32) -> Result<i32, ProtocolError> {
        self.write(Mnemonic::SetTravelDistance, steps)
    }

    /// Number of repetitions of the active record
    pub fn repeats(&self) -> Result<i32, ProtocolError> {
        self.read(Mnemonic::ReadRepeats)
    }

    /// Store the number of repetitions
    pub fn set_repeats(&self, repeats: i32) -> Result<i32, ProtocolError> {
        self.write(Mnemonic::SetRepeats, repeats)
    }

    /// Phase current in percent of 7 A
    pub fn phase_current(&self) -> Result<i32, ProtocolError> {
        self.read(Mnemonic::ReadPhaseCurrent)
    }

    /// Store the phase current in percent
    pub fn set_phase_current(&self, percent: i32) -> Result<i32, ProtocolError> {
        self.write(Mnemonic::SetPhaseCurrent, percent)
    }

    /// Standstill phase current in percent of 7 A
    pub fn halt_current(&self) -> Result<i32, ProtocolError> {
        self.read(Mnemonic::ReadHaltCurrent)
    }

    /// Store the standstill phase current in percent
    pub fn set_halt_current(&self, percent: i32) -> Result<i32, ProtocolError> {
        self.write(Mnemonic::SetHaltCurrent, percent)
    }
}

/// Async facade over [`Controller`].
///
/// Each exchange runs on tokio's blocking pool so the runtime's worker threads
/// never wait on the serial line.
#[derive(Debug, Clone)]
pub struct AsyncController {
    inner: Arc<Controller>,
}

impl AsyncController {
    /// Wrap a blocking controller
    pub fn new(controller: Controller) -> Self {
        Self {
            inner: Arc::new(controller),
        }
    }

    /// Blocking controller underneath
    pub fn controller(&self) -> &Controller {
        &self.inner
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ProtocolError>
    where
        T: Send + 'static,
        F: FnOnce(&Controller) -> Result<T, ProtocolError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(inner.as_ref()))
            .await
            .map_err(|e| ProtocolError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }

    /// See [`Controller::execute`]
    pub async fn execute(
        &self,
        mnemonic: Mnemonic,
        argument: Option<i32>,
    ) -> Result<ParsedValue, ProtocolError> {
        self.blocking(move |c| c.execute(mnemonic, argument)).await
    }

    /// See [`Controller::position`]
    pub async fn position(&self) -> Result<i32, ProtocolError> {
        self.blocking(|c| c.position()).await
    }

    /// See [`Controller::status`]
    pub async fn status(&self) -> Result<String, ProtocolError> {
        self.blocking(|c| c.status()).await
    }

    /// See [`Controller::current_set`]
    pub async fn current_set(&self) -> Result<Record, ProtocolError> {
        self.blocking(|c| c.current_set()).await
    }

    /// See [`Controller::start`]
    pub async fn start(&self) -> Result<String, ProtocolError> {
        self.blocking(|c| c.start()).await
    }

    /// See [`Controller::stop`]
    pub async fn stop(&self, mode: StopMode) -> Result<String, ProtocolError> {
        self.blocking(move |c| c.stop(mode)).await
    }
}
