//! The only (command set, command id) values the core itself is aware of.
//!
//! Everything else in the command space belongs to the domain layer built
//! on top of this crate; the core treats every other payload opaquely.

/// Command set for push telemetry with no acknowledgement expected.
pub const CMD_SET_BROADCAST: u8 = 0x02;
/// Command set for activation, including `getVersion`; the core only cares
/// that a successful activation response may be followed by [`crate::Link::set_key`].
pub const CMD_SET_ACTIVATION: u8 = 0x00;
/// Command id `CODE_FROMMOBILE`, within [`CMD_SET_BROADCAST`]: transparent
/// passthrough data pushed from the mobile app, delivered the same way as
/// any other broadcast push (no ack) but routed to its own handler slot
/// rather than the general broadcast one.
pub const CMD_ID_FROM_MOBILE: u8 = 0x02;
