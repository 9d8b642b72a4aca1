//! # steplink Core Library
//!
//! Serial command/response engine for Nanotec-style stepper motor controllers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Framing of the ASCII controller protocol (`#<addr><cmd>[<arg>]\r`)
//! - Deadline-bounded send/receive over serial lines
//! - Typed decoding of scalar, status, mode and record replies
//! - Controller handles and a JSON-configured bridge of serial lines
//!
//! ## Supported controllers
//!
//! - SMCI12, SMCI33, SMCI35, SMCI36, SMCI47-S
//! - SMCP33
//! - PD2-N, PD4-N, PD6-N
//!
//! ## Example
//!
//! ```rust,ignore
//! use steplink_core::prelude::*;
//!
//! let channel = Channel::open("/dev/ttyUSB0", ChannelConfig::default())?.into_shared();
//! let motor = Controller::new(channel, Address::new(1)?);
//!
//! println!("status: {}", motor.status()?);
//! println!("position: {}", motor.position()?);
//! ```

pub mod bridge;
pub mod config;
pub mod controller;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bridge::Bridge;
    pub use crate::config::{BridgeConfig, ConfigError};
    pub use crate::controller::{AsyncController, Controller, StopMode};
    pub use crate::protocol::{
        send_command, Address, Channel, ChannelConfig, Mnemonic, ParsedValue, ProtocolError,
        Record, SharedChannel,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
