//! Protocol commands
//!
//! Defines the command vocabulary understood by Nanotec SMCI/PD controllers.
//! Read variants of the motion-record fields are the write mnemonic prefixed
//! with `Z`; the complete record is dumped with `Z|`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use super::{ProtocolError, DEFAULT_READ_TIMEOUT_MS};

/// How a command is used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    /// Triggers controller behavior (start, stop)
    Action,
    /// Queries a value, never takes an argument
    Read,
    /// Stores a value, always takes an argument
    Write,
}

/// Argument accepted by a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentRule {
    /// Must be sent bare
    None,
    /// May carry a value in the range
    Optional(RangeInclusive<i32>),
    /// Must carry a value in the range
    Required(RangeInclusive<i32>),
}

/// Shape of the payload the controller answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseShape {
    /// Bare echo of the command, no payload
    Acknowledge,
    /// One signed decimal integer
    Scalar,
    /// Status word, rendered as descriptive clauses
    Status,
    /// Position mode index, rendered through the mode table
    PositionMode,
    /// Free text (firmware version)
    Text,
    /// Complete motion record
    Record,
}

/// Controller command mnemonics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mnemonic {
    /// Start motor with the current record ('A')
    StartMotor,
    /// Stop motor ('S', optional 0 = quick stop, 1 = brake ramp)
    StopMotor,
    /// Read current position ('C')
    ReadPosition,
    /// Read status word ('$')
    ReadStatus,
    /// Read firmware version ('v')
    ReadFirmwareVersion,
    /// Dump the complete current record ('Z|')
    ReadCurrentSet,
    /// Read position mode ('Zp')
    ReadPositionMode,
    /// Read travel distance in steps ('Zs')
    ReadTravelDistance,
    /// Read minimum step frequency ('Zu')
    ReadMinFrequency,
    /// Read maximum step frequency ('Zo')
    ReadMaxFrequency,
    /// Read second maximum step frequency ('Zn')
    ReadMaxFrequency2,
    /// Read acceleration ramp ('Zb')
    ReadAccelRamp,
    /// Read brake ramp ('ZB')
    ReadBrakeRamp,
    /// Read direction of rotation ('Zd')
    ReadDirection,
    /// Read direction change on repeat ('Zt')
    ReadDirectionChange,
    /// Read repetitions of the record ('ZW')
    ReadRepeats,
    /// Read pause before the next record ('ZP')
    ReadPause,
    /// Read number of the chained record ('ZN')
    ReadNextRecord,
    /// Read phase current ('Zi')
    ReadPhaseCurrent,
    /// Read standstill phase current ('Zr')
    ReadHaltCurrent,
    /// Read step mode ('Zg')
    ReadStepMode,
    /// Set position mode ('p')
    SetPositionMode,
    /// Set travel distance in steps ('s')
    SetTravelDistance,
    /// Set minimum step frequency ('u')
    SetMinFrequency,
    /// Set maximum step frequency ('o')
    SetMaxFrequency,
    /// Set second maximum step frequency ('n')
    SetMaxFrequency2,
    /// Set acceleration ramp ('b')
    SetAccelRamp,
    /// Set brake ramp ('B')
    SetBrakeRamp,
    /// Set direction of rotation, 0 = left ('d')
    SetDirection,
    /// Enable direction change on repeat ('t')
    SetDirectionChange,
    /// Set repetitions, 0 = endless ('W')
    SetRepeats,
    /// Set pause before the next record in ms ('P')
    SetPause,
    /// Chain to record N, 0 = none ('N')
    SetNextRecord,
    /// Phase current in percent of 7 A ('i')
    SetPhaseCurrent,
    /// Phase current at standstill in percent of 7 A ('r')
    SetHaltCurrent,
    /// Set step mode (microsteps per full step) ('g')
    SetStepMode,
    /// Assign a new bus address ('m'), normally sent to the broadcast address
    SetMotorAddress,
}

impl Mnemonic {
    /// Every mnemonic, in declaration order
    pub const ALL: [Mnemonic; 37] = [
        Mnemonic::StartMotor,
        Mnemonic::StopMotor,
        Mnemonic::ReadPosition,
        Mnemonic::ReadStatus,
        Mnemonic::ReadFirmwareVersion,
        Mnemonic::ReadCurrentSet,
        Mnemonic::ReadPositionMode,
        Mnemonic::ReadTravelDistance,
        Mnemonic::ReadMinFrequency,
        Mnemonic::ReadMaxFrequency,
        Mnemonic::ReadMaxFrequency2,
        Mnemonic::ReadAccelRamp,
        Mnemonic::ReadBrakeRamp,
        Mnemonic::ReadDirection,
        Mnemonic::ReadDirectionChange,
        Mnemonic::ReadRepeats,
        Mnemonic::ReadPause,
        Mnemonic::ReadNextRecord,
        Mnemonic::ReadPhaseCurrent,
        Mnemonic::ReadHaltCurrent,
        Mnemonic::ReadStepMode,
        Mnemonic::SetPositionMode,
        Mnemonic::SetTravelDistance,
        Mnemonic::SetMinFrequency,
        Mnemonic::SetMaxFrequency,
        Mnemonic::SetMaxFrequency2,
        Mnemonic::SetAccelRamp,
        Mnemonic::SetBrakeRamp,
        Mnemonic::SetDirection,
        Mnemonic::SetDirectionChange,
        Mnemonic::SetRepeats,
        Mnemonic::SetPause,
        Mnemonic::SetNextRecord,
        Mnemonic::SetPhaseCurrent,
        Mnemonic::SetHaltCurrent,
        Mnemonic::SetStepMode,
        Mnemonic::SetMotorAddress,
    ];

    /// The ASCII token sent after the address
    pub fn token(&self) -> &'static str {
        match self {
            Mnemonic::StartMotor => "A",
            Mnemonic::StopMotor => "S",
            Mnemonic::ReadPosition => "C",
            Mnemonic::ReadStatus => "$",
            Mnemonic::ReadFirmwareVersion => "v",
            Mnemonic::ReadCurrentSet => "Z|",
            Mnemonic::ReadPositionMode => "Zp",
            Mnemonic::ReadTravelDistance => "Zs",
            Mnemonic::ReadMinFrequency => "Zu",
            Mnemonic::ReadMaxFrequency => "Zo",
            Mnemonic::ReadMaxFrequency2 => "Zn",
            Mnemonic::ReadAccelRamp => "Zb",
            Mnemonic::ReadBrakeRamp => "ZB",
            Mnemonic::ReadDirection => "Zd",
            Mnemonic::ReadDirectionChange => "Zt",
            Mnemonic::ReadRepeats => "ZW",
            Mnemonic::ReadPause => "ZP",
            Mnemonic::ReadNextRecord => "ZN",
            Mnemonic::ReadPhaseCurrent => "Zi",
            Mnemonic::ReadHaltCurrent => "Zr",
            Mnemonic::ReadStepMode => "Zg",
            Mnemonic::SetPositionMode => "p",
            Mnemonic::SetTravelDistance => "s",
            Mnemonic::SetMinFrequency => "u",
            Mnemonic::SetMaxFrequency => "o",
            Mnemonic::SetMaxFrequency2 => "n",
            Mnemonic::SetAccelRamp => "b",
            Mnemonic::SetBrakeRamp => "B",
            Mnemonic::SetDirection => "d",
            Mnemonic::SetDirectionChange => "t",
            Mnemonic::SetRepeats => "W",
            Mnemonic::SetPause => "P",
            Mnemonic::SetNextRecord => "N",
            Mnemonic::SetPhaseCurrent => "i",
            Mnemonic::SetHaltCurrent => "r",
            Mnemonic::SetStepMode => "g",
            Mnemonic::SetMotorAddress => "m",
        }
    }

    /// Characters the controller echoes right before the payload.
    ///
    /// The record dump answers `<addr>Z` followed directly by the first tag.
    pub fn echo_marker(&self) -> &'static str {
        match self {
            Mnemonic::ReadCurrentSet => "Z",
            other => other.token(),
        }
    }

    /// Whether the command acts, reads or writes
    pub fn access(&self) -> Access {
        match self {
            Mnemonic::StartMotor | Mnemonic::StopMotor => Access::Action,
            Mnemonic::ReadPosition
            | Mnemonic::ReadStatus
            | Mnemonic::ReadFirmwareVersion
            | Mnemonic::ReadCurrentSet
            | Mnemonic::ReadPositionMode
            | Mnemonic::ReadTravelDistance
            | Mnemonic::ReadMinFrequency
            | Mnemonic::ReadMaxFrequency
            | Mnemonic::ReadMaxFrequency2
            | Mnemonic::ReadAccelRamp
            | Mnemonic::ReadBrakeRamp
            | Mnemonic::ReadDirection
            | Mnemonic::ReadDirectionChange
            | Mnemonic::ReadRepeats
            | Mnemonic::ReadPause
            | Mnemonic::ReadNextRecord
            | Mnemonic::ReadPhaseCurrent
            | Mnemonic::ReadHaltCurrent
            | Mnemonic::ReadStepMode => Access::Read,
            _ => Access::Write,
        }
    }

    /// True for queries
    pub fn is_readable(&self) -> bool {
        self.access() == Access::Read
    }

    /// True for setters
    pub fn is_writable(&self) -> bool {
        self.access() == Access::Write
    }

    /// Legal integer range for the argument, if the command takes one
    pub fn range(&self) -> Option<RangeInclusive<i32>> {
        match self.argument_rule() {
            ArgumentRule::None => None,
            ArgumentRule::Optional(r) | ArgumentRule::Required(r) => Some(r),
        }
    }

    /// Whether an argument is forbidden, optional or required, and its range
    pub fn argument_rule(&self) -> ArgumentRule {
        match self {
            Mnemonic::StopMotor => ArgumentRule::Optional(0..=1),
            Mnemonic::SetPositionMode => ArgumentRule::Required(1..=19),
            Mnemonic::SetTravelDistance => ArgumentRule::Required(-100_000_000..=100_000_000),
            Mnemonic::SetMinFrequency => ArgumentRule::Required(1..=160_000),
            Mnemonic::SetMaxFrequency | Mnemonic::SetMaxFrequency2 => {
                ArgumentRule::Required(1..=1_000_000)
            }
            Mnemonic::SetAccelRamp => ArgumentRule::Required(1..=65_535),
            Mnemonic::SetBrakeRamp | Mnemonic::SetPause => ArgumentRule::Required(0..=65_535),
            Mnemonic::SetDirection | Mnemonic::SetDirectionChange => ArgumentRule::Required(0..=1),
            Mnemonic::SetRepeats => ArgumentRule::Required(0..=254),
            Mnemonic::SetNextRecord => ArgumentRule::Required(0..=32),
            Mnemonic::SetPhaseCurrent | Mnemonic::SetHaltCurrent => ArgumentRule::Required(0..=150),
            Mnemonic::SetStepMode => ArgumentRule::Required(1..=255),
            Mnemonic::SetMotorAddress => ArgumentRule::Required(1..=254),
            _ => ArgumentRule::None,
        }
    }

    /// How the reply payload is decoded
    pub fn response_shape(&self) -> ResponseShape {
        match self {
            Mnemonic::StartMotor | Mnemonic::StopMotor => ResponseShape::Acknowledge,
            Mnemonic::ReadStatus => ResponseShape::Status,
            Mnemonic::ReadFirmwareVersion => ResponseShape::Text,
            Mnemonic::ReadCurrentSet => ResponseShape::Record,
            Mnemonic::ReadPositionMode => ResponseShape::PositionMode,
            _ => ResponseShape::Scalar,
        }
    }

    /// Default response deadline for this command
    pub fn timeout(&self) -> Duration {
        match self {
            Mnemonic::ReadCurrentSet => Duration::from_millis(300), // long dump
            Mnemonic::ReadFirmwareVersion => Duration::from_millis(200),
            _ => Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Mnemonic {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mnemonic::ALL
            .iter()
            .copied()
            .find(|m| m.token() == s)
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("unknown mnemonic '{}'", s)))
    }
}

/// A mnemonic with its optional argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    mnemonic: Mnemonic,
    argument: Option<i32>,
}

impl Command {
    /// Create a command without argument
    pub fn new(mnemonic: Mnemonic) -> Self {
        Self {
            mnemonic,
            argument: None,
        }
    }

    /// Create a command carrying an argument
    pub fn with_argument(mnemonic: Mnemonic, argument: i32) -> Self {
        Self {
            mnemonic,
            argument: Some(argument),
        }
    }

    /// Command being sent
    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    /// Argument appended after the token, if any
    pub fn argument(&self) -> Option<i32> {
        self.argument
    }

    /// Check the argument against the mnemonic's declared rule
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match (self.mnemonic.argument_rule(), self.argument) {
            (ArgumentRule::None, None) => Ok(()),
            (ArgumentRule::None, Some(arg)) => Err(ProtocolError::InvalidArgument(format!(
                "'{}' takes no argument, got {}",
                self.mnemonic, arg
            ))),
            (ArgumentRule::Required(_), None) => Err(ProtocolError::InvalidArgument(format!(
                "'{}' requires an argument",
                self.mnemonic
            ))),
            (ArgumentRule::Optional(_), None) => Ok(()),
            (ArgumentRule::Optional(range), Some(arg))
            | (ArgumentRule::Required(range), Some(arg)) => {
                if range.contains(&arg) {
                    Ok(())
                } else {
                    Err(ProtocolError::InvalidArgument(format!(
                        "'{}' argument {} outside {}..={}",
                        self.mnemonic,
                        arg,
                        range.start(),
                        range.end()
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        for (i, a) in Mnemonic::ALL.iter().enumerate() {
            for b in &Mnemonic::ALL[i + 1..] {
                assert_ne!(a.token(), b.token(), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_token_round_trip() {
        for m in Mnemonic::ALL {
            assert_eq!(m.token().parse::<Mnemonic>().unwrap(), m);
        }
        assert!("Q".parse::<Mnemonic>().is_err());
    }

    #[test]
    fn test_reads_take_no_argument() {
        for m in Mnemonic::ALL.iter().filter(|m| m.is_readable()) {
            assert_eq!(m.argument_rule(), ArgumentRule::None);
            assert!(Command::with_argument(*m, 1).validate().is_err());
        }
    }

    #[test]
    fn test_writes_require_argument() {
        for m in Mnemonic::ALL.iter().filter(|m| m.is_writable()) {
            assert!(matches!(m.argument_rule(), ArgumentRule::Required(_)));
            assert!(Command::new(*m).validate().is_err());
        }
    }

    #[test]
    fn test_position_mode_boundaries() {
        assert!(Command::with_argument(Mnemonic::SetPositionMode, 0).validate().is_err());
        assert!(Command::with_argument(Mnemonic::SetPositionMode, 1).validate().is_ok());
        assert!(Command::with_argument(Mnemonic::SetPositionMode, 19).validate().is_ok());
        assert!(Command::with_argument(Mnemonic::SetPositionMode, 20).validate().is_err());
    }

    #[test]
    fn test_stop_argument_optional() {
        assert!(Command::new(Mnemonic::StopMotor).validate().is_ok());
        assert!(Command::with_argument(Mnemonic::StopMotor, 0).validate().is_ok());
        assert!(Command::with_argument(Mnemonic::StopMotor, 2).validate().is_err());
    }

    #[test]
    fn test_record_echo_marker() {
        assert_eq!(Mnemonic::ReadCurrentSet.token(), "Z|");
        assert_eq!(Mnemonic::ReadCurrentSet.echo_marker(), "Z");
        assert_eq!(Mnemonic::ReadRepeats.echo_marker(), "ZW");
    }

    #[test]
    fn test_command_timeouts() {
        assert!(Mnemonic::ReadCurrentSet.timeout() > Mnemonic::ReadPosition.timeout());
        assert_eq!(Mnemonic::ReadStatus.timeout(), Duration::from_millis(100));
    }
}
