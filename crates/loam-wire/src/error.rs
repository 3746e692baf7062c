//! Wire protocol error types.

use std::error::Error;
use std::fmt;

use loam_core::NotFoundError;

/// Errors from encoding, decoding, or frame assembly.
///
/// Every variant is fatal to the offending *connection*, not the
/// process: the receiver closes the connection and applies no partial
/// state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireError {
    /// A tag byte outside the fixed table.
    UnknownTag {
        /// The offending tag byte.
        found: u8,
    },
    /// The tag did not match the type the decoder was asked for.
    TagMismatch {
        /// Tag the caller expected.
        expected: u8,
        /// Tag actually present.
        found: u8,
    },
    /// Decoding ran past the available bytes.
    UnexpectedEnd {
        /// Bytes the decoder needed.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// A declared payload or blob length above the fixed maximum.
    ///
    /// Rejected before allocation so a hostile header cannot make the
    /// receiver reserve unbounded memory.
    PayloadTooLarge {
        /// Declared length.
        declared: usize,
        /// The maximum the receiver accepts.
        max: usize,
    },
    /// String bytes that were not valid UTF-8.
    InvalidUtf8,
    /// A payload with bytes left over after the packet decoded itself.
    TrailingBytes {
        /// Number of undecoded bytes.
        count: usize,
    },
    /// No factory registered for a packet type.
    UnknownPacketType {
        /// The unregistered packet type.
        packet_type: u16,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTag { found } => write!(f, "unknown wire tag {found:#04x}"),
            Self::TagMismatch { expected, found } => {
                write!(f, "wire tag mismatch: expected {expected:#04x}, found {found:#04x}")
            }
            Self::UnexpectedEnd { needed, available } => {
                write!(f, "decode past end: needed {needed} bytes, {available} available")
            }
            Self::PayloadTooLarge { declared, max } => {
                write!(f, "declared length {declared} exceeds maximum {max}")
            }
            Self::InvalidUtf8 => write!(f, "string bytes are not valid UTF-8"),
            Self::TrailingBytes { count } => {
                write!(f, "{count} trailing bytes after packet decode")
            }
            Self::UnknownPacketType { packet_type } => {
                write!(f, "no factory registered for packet type {packet_type}")
            }
        }
    }
}

impl Error for WireError {}

/// Errors from a packet's `handle` behavior.
#[derive(Debug)]
pub enum HandleError {
    /// The packet referenced a realm or occupant that no longer
    /// exists. Logged and dropped; the connection stays open.
    NotFound(NotFoundError),
    /// The handler hit a condition fatal to this connection.
    Fatal {
        /// Human-readable description.
        reason: String,
    },
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(inner) => write!(f, "dropped packet: {inner}"),
            Self::Fatal { reason } => write!(f, "fatal handler error: {reason}"),
        }
    }
}

impl Error for HandleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound(inner) => Some(inner),
            Self::Fatal { .. } => None,
        }
    }
}

impl From<NotFoundError> for HandleError {
    fn from(err: NotFoundError) -> Self {
        Self::NotFound(err)
    }
}
