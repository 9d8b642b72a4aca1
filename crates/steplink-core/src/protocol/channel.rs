//! Channel ownership and line configuration
//!
//! A [`Channel`] owns one open descriptor and the settings it was configured
//! with. Closing it leaves a sentinel behind: every later operation fails with
//! [`ProtocolError::BadHandle`] without touching the OS.

use serde::{Deserialize, Serialize};
use serialport::FlowControl;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::link::Link;
use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS};

/// A channel shared between every controller on the same line.
///
/// The lock is held for a full flush, send and receive sequence.
pub type SharedChannel = Arc<Mutex<Channel>>;

/// Timeout for the blocking read inside `serialport`. Readiness is decided by
/// the transport's poll, so this only bounds a read that races a vanished byte.
const PORT_READ_TIMEOUT_MS: u64 = 10;

/// Input processing mode of the line discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineMode {
    /// Kernel buffers input until the `\r` terminator
    Canonical,
    /// Bytes are delivered as they arrive; the engine's deadline completes a frame
    #[default]
    Raw,
}

/// Data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CharSize {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits, what the controllers use
    #[default]
    Eight,
}

impl TryFrom<u8> for CharSize {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(CharSize::Five),
            6 => Ok(CharSize::Six),
            7 => Ok(CharSize::Seven),
            8 => Ok(CharSize::Eight),
            other => Err(format!("character size must be 5-8 bits, got {}", other)),
        }
    }
}

impl From<CharSize> for u8 {
    fn from(size: CharSize) -> u8 {
        match size {
            CharSize::Five => 5,
            CharSize::Six => 6,
            CharSize::Seven => 7,
            CharSize::Eight => 8,
        }
    }
}

impl From<CharSize> for serialport::DataBits {
    fn from(size: CharSize) -> Self {
        match size {
            CharSize::Five => serialport::DataBits::Five,
            CharSize::Six => serialport::DataBits::Six,
            CharSize::Seven => serialport::DataBits::Seven,
            CharSize::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Parity bit setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// Two stop bits
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(format!("stop bits must be 1 or 2, got {}", other)),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> u8 {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Line discipline and deadline settings for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits, 8 unless the controller was reconfigured
    #[serde(default)]
    pub char_size: CharSize,

    /// Parity, none by default
    #[serde(default)]
    pub parity: Parity,

    /// Stop bits, one by default
    #[serde(default)]
    pub stop_bits: StopBits,

    /// Whether the kernel or the engine assembles replies
    #[serde(default)]
    pub mode: LineMode,

    /// Response deadline used when a caller does not pick one
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Deadline for transmit readiness
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Raw mode inter-character timeout (VTIME), in tenths of a second
    #[serde(default = "default_inter_char_timeout_ds")]
    pub inter_char_timeout_ds: u8,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

fn default_inter_char_timeout_ds() -> u8 {
    1
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            char_size: CharSize::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            mode: LineMode::default(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            inter_char_timeout_ds: default_inter_char_timeout_ds(),
        }
    }
}

impl ChannelConfig {
    /// [`read_timeout_ms`](Self::read_timeout_ms) as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// [`write_timeout_ms`](Self::write_timeout_ms) as a `Duration`
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// One open connection to a controller bus
pub struct Channel {
    /// `None` once closed
    link: Option<Box<dyn Link>>,
    config: ChannelConfig,
    name: String,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("open", &self.link.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl Channel {
    /// Open the tty at `path` and apply `config`
    pub fn open(path: &str, config: ChannelConfig) -> Result<Self, ProtocolError> {
        debug!("opening {} at {} baud", path, config.baud_rate);

        let port = serialport::new(path, config.baud_rate)
            .data_bits(config.char_size.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(PORT_READ_TIMEOUT_MS))
            .open_native()
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path, e)))?;

        let mut channel = Channel {
            link: Some(Box::new(port)),
            config: config.clone(),
            name: path.to_string(),
        };
        channel.configure(config)?;
        Ok(channel)
    }

    /// Adopt an already open link and apply `config` to it
    pub fn from_link(link: Box<dyn Link>, config: ChannelConfig) -> Result<Self, ProtocolError> {
        let name = link.describe();
        let mut channel = Channel {
            link: Some(link),
            config: config.clone(),
            name,
        };
        channel.configure(config)?;
        Ok(channel)
    }

    /// Apply new line settings. On failure the previous settings stay recorded.
    pub fn configure(&mut self, config: ChannelConfig) -> Result<(), ProtocolError> {
        self.link_mut()?.configure(&config)?;
        debug!(
            "{}: configured {} baud, {}{:?}{}, {:?} mode",
            self.name,
            config.baud_rate,
            u8::from(config.char_size),
            config.parity,
            u8::from(config.stop_bits),
            config.mode
        );
        self.config = config;
        Ok(())
    }

    /// Whether the channel still holds an open descriptor
    pub fn is_valid(&self) -> bool {
        self.link.as_ref().is_some_and(|l| l.as_raw_fd() >= 0)
    }

    /// Close the descriptor. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("{}: closing", self.name);
            drop(link);
        }
    }

    /// Settings last applied successfully
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Device path or link description, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wrap for use by several controllers
    pub fn into_shared(self) -> SharedChannel {
        Arc::new(Mutex::new(self))
    }

    pub(crate) fn link_mut(&mut self) -> Result<&mut dyn Link, ProtocolError> {
        match self.link.as_deref_mut() {
            Some(link) if link.as_raw_fd() >= 0 => Ok(link),
            _ => Err(ProtocolError::BadHandle),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}
