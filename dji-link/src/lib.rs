//! Transport and session core for a ground-to-air onboard link.
//!
//! This crate frames, optionally encrypts, acknowledges, and dispatches a
//! proprietary binary protocol spoken over a serial or datagram transport
//! between a companion computer and a flight controller. It is the part of
//! an onboard SDK that earns its keep: the domain command catalogue
//! (activation, control, camera, gimbal, waypoints, subscription) is built
//! on top and is out of scope here.
//!
//! # Architecture Overview
//!
//! - **[`frame`]** — the wire frame header, CRCs, and the codec that packs
//!   a logical command into bytes and parses the reverse.
//! - **[`cipher`]** — the optional AES-128-ECB encryption layer applied to
//!   payload bytes only.
//! - **[`arena`]** — a fixed-size byte region managed by a compacting
//!   best-fit allocator, backing every in-flight session.
//! - **[`session`]** — the request-session and ack-cache tables keyed by
//!   session id, with retry/timeout bookkeeping.
//! - **[`deframer`]** — turns an unaligned, possibly lossy byte stream into
//!   a sequence of CRC-verified frames, resynchronising on corruption.
//! - **[`registry`]** — the (command set, command id) → handler table
//!   consulted by the request path.
//! - **[`link`]** — [`Link`], the top-level object tying all of the above
//!   together behind the public send/ack/register surface and the two
//!   cooperative polls the embedder drives.
//! - **[`pipe`]** — [`pipe::BytePipe`], the trait an embedder implements to
//!   supply non-blocking I/O, a monotonic clock, and a coarse mutex.
//!
//! # Typical Usage
//!
//! 1. Implement [`pipe::BytePipe`] for your serial port or UDP socket.
//! 2. Construct a [`Link`] over it.
//! 3. Call [`Link::set_key`] if the peer requires encryption.
//! 4. Register handlers with [`Link::register_handler`],
//!    [`Link::set_broadcast_handler`], [`Link::set_transparent_handler`].
//! 5. Drive [`Link::send_poll`] and [`Link::read_poll`] from your scheduler
//!    (or feed bytes directly through [`Link::byte_handler`]).
//! 6. Call [`Link::send`] to issue outbound commands.
//!
//! ---
//!
//! # Frame Layout
//!
//! ```text
//! +--------+----------------+---------+--------+---------+--------+
//! | MAGIC  |  HEADER FIELDS | SEQ NUM | HEAD_CRC| PAYLOAD | FR_CRC |
//! +--------+----------------+---------+--------+---------+--------+
//! | 1 byte |     7 bytes    | 2 bytes | 2 bytes | N bytes | 4 byte |
//! +--------+----------------+---------+--------+---------+--------+
//! ```
//!
//! The 12-byte header packs magic, length, version, session id, ack flag,
//! encryption type, and pad length; see [`frame::FrameHeader`].
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub use arena::{Arena, ExtentId};
pub use catalogue::{CMD_ID_FROM_MOBILE, CMD_SET_ACTIVATION, CMD_SET_BROADCAST};
pub use error::{Error, Result, WireError};
pub use frame::{FrameHeader, RawFrame};
pub use link::{Command, Link, Outcome, Req, SessionMode};
pub use pipe::BytePipe;

pub mod arena;
mod catalogue;
pub mod cipher;
pub mod deframer;
mod error;
pub mod frame;
mod link;
pub mod pipe;
pub mod registry;
pub mod session;

#[cfg(feature = "std")]
pub mod std_pipe;

/// Start-of-frame magic byte.
pub const MAGIC: u8 = 0xAA;
/// Size of the fixed 12-byte header.
pub const HEADER_SIZE: usize = 12;
/// Size of the trailing CRC32.
pub const TRAILER_SIZE: usize = 4;
/// Maximum total frame size (header + payload + trailer).
pub const MAX_FRAME_SIZE: usize = 1024;
/// Maximum payload a single frame may carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE - TRAILER_SIZE;
/// Protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 1;
/// AES-ECB block size used when a frame opts into encryption.
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Number of slots in the memory arena's extent table (including the two sentinels).
pub const MMU_TABLE_NUM: usize = 32;
/// Backing capacity of the memory arena, in bytes.
pub const MEMORY_SIZE: usize = 8192;
/// Number of request-session slots (0 and 1 reserved, 2..32 the reliable pool).
pub const SESSION_TABLE_NUM: usize = 32;
/// Number of ack-cache slots, one per session id in `1..32`.
pub const ACK_TABLE_NUM: usize = SESSION_TABLE_NUM - 1;
/// Receive buffer capacity of the stream deframer.
pub const BUFFER_SIZE: usize = 1536;
/// Maximum number of (command set, command id) handler registrations.
pub const MAX_HANDLERS: usize = 32;

/// Reserved session id for single-shot, no-ack sends.
pub const SESSION_NO_ACK: u8 = 0;
/// Reserved session id for single-shot, ack-once sends.
pub const SESSION_ACK_ONCE: u8 = 1;
/// Sentinel requesting auto-assignment from the reliable pool (`2..32`).
pub const SESSION_AUTO: u8 = 32;

mod private {
    pub use super::*;

    #[allow(unused_imports)]
    #[cfg(feature = "defmt")]
    pub use ::defmt::{debug, error, info, trace, warn};

    pub use core::error::Error as StdError;
    pub use core::fmt::{Display, Formatter, Result as FmtResult};
    pub use core::result::Result as StdResult;
}
