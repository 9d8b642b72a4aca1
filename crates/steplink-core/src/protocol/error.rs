//! Protocol errors

use thiserror::Error;

/// Why a response could not be interpreted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// Reply does not echo the address and mnemonic of the request
    #[error("echo marker '{0}' not found")]
    MissingEcho(String),

    /// Echo present but nothing after it
    #[error("controller returned no data after '{0}'")]
    EmptyPayload(String),

    /// Payload is not a base-10 number
    #[error("'{0}' is not a decimal integer")]
    NotAnInteger(String),

    /// A `Z|` dump lacks one of its fixed tags
    #[error("record tag '{0}' missing")]
    MissingTag(&'static str),

    /// A `Z|` field holds something other than a number
    #[error("record field '{tag}' is not a decimal integer: '{value}'")]
    BadField {
        /// Tag of the offending field
        tag: &'static str,
        /// Text found after the tag
        value: String,
    },

    /// Bytes arrived but the terminator never did
    #[error("response ended without terminator")]
    IncompleteFrame,

    /// Reply decoded to a different kind of value than the operation returns
    #[error("decoded reply is not {expected}")]
    UnexpectedShape {
        /// Kind of value the operation needed
        expected: &'static str,
    },
}

/// Errors that can occur during a request/response exchange
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The channel was closed or never held a usable descriptor
    #[error("Channel handle is closed or invalid")]
    BadHandle,

    /// Opening or configuring the line failed
    #[error("Line configuration failed: {0}")]
    Config(String),

    /// Deadline expired before the channel became ready
    #[error("Timed out waiting for channel readiness")]
    Timeout,

    /// The frame went out short
    #[error("Partial write: {written} of {expected} bytes")]
    PartialWrite {
        /// Bytes the write call accepted
        written: usize,
        /// Length of the whole frame
        expected: usize,
    },

    /// Request rejected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A reply arrived but could not be decoded
    #[error("Malformed response ({reason}): {raw:?}")]
    MalformedResponse {
        /// What was wrong with it
        reason: MalformedReason,
        /// Reply text as received
        raw: String,
    },

    /// Another thread panicked while holding the channel
    #[error("Channel lock poisoned by a panicked holder")]
    LockPoisoned,

    /// Operating system error on the descriptor
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(reason: MalformedReason, raw: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse {
            reason,
            raw: raw.into(),
        }
    }

    /// True for a readiness deadline that expired
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout)
    }

    /// True when the controller answered with an echo but nothing after it
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedResponse {
                reason: MalformedReason::EmptyPayload(_),
                ..
            }
        )
    }

    /// Whether a caller-level retry of the same request could succeed.
    ///
    /// Local validation failures and a closed handle will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout
                | ProtocolError::PartialWrite { .. }
                | ProtocolError::MalformedResponse { .. }
                | ProtocolError::Io(_)
        )
    }
}
