//! Error types for the onboard link transport core.

use crate::private::*;

/// A specialized `Result` type with [`Error`].
pub type Result<T> = StdResult<T, Error>;

///
/// # Error types for link operations.
///
/// Every variant returned from a public entry point (`send`, `ack`,
/// `register_handler`, `set_key`) is synchronous: the caller learns of the
/// failure immediately. Timeout and cancellation are *not* represented here
/// — they are delivered through a command's completion callback as an
/// [`crate::Outcome`], since they are not call-site errors.
///
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Payload too large, unknown session mode, or other malformed input.
    InvalidArgument,
    /// The requested session id is already in use.
    Busy,
    /// The memory arena cannot satisfy the allocation even after compaction.
    OutOfMemory,
    /// An encrypted send was requested but no key has been installed.
    NoKey,
    /// The destination buffer is too small to hold the encoded frame.
    BufferTooSmall { need: usize },
    /// The encryption key has an invalid length.
    InvalidKeyLength { got: usize },
    /// The handler registry has no free slot left for a new registration.
    HandlerTableFull,
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Busy => write!(f, "requested session id is busy"),
            Self::OutOfMemory => write!(f, "memory arena exhausted"),
            Self::NoKey => write!(f, "encryption requested but no key installed"),
            Self::BufferTooSmall { need } => {
                write!(f, "destination buffer too small, need {need} bytes")
            }
            Self::InvalidKeyLength { got } => {
                write!(f, "invalid key length: expected 16 bytes, got {got}")
            }
            Self::HandlerTableFull => write!(f, "handler registry is full"),
        }
    }
}

///
/// Errors that can occur while decoding a single candidate frame from the
/// byte stream. These never reach a public caller; the deframer resyncs
/// internally and only exposes them as counters (see [`crate::deframer::DeframerStats`]).
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WireError {
    /// No start-of-frame magic byte found in the scanned region.
    MissingMagic,
    /// Declared frame length falls outside `12..=1024`.
    InvalidLength { length: usize },
    /// Header CRC did not match.
    InvalidHeaderCrc,
    /// Whole-frame CRC did not match.
    InvalidFrameCrc,
    /// Declared protocol version is not supported.
    UnsupportedVersion { version: u8 },
    /// Frame claims encryption but no key has been installed.
    NoKey,
}

impl StdError for WireError {}

impl Display for WireError {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::MissingMagic => write!(f, "no start-of-frame magic byte found"),
            Self::InvalidLength { length } => {
                write!(f, "invalid declared frame length {length}")
            }
            Self::InvalidHeaderCrc => write!(f, "header CRC mismatch"),
            Self::InvalidFrameCrc => write!(f, "frame CRC mismatch"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported protocol version {version}")
            }
            Self::NoKey => write!(f, "frame is encrypted but no key is installed"),
        }
    }
}
