//!
//! Turns an unaligned, possibly lossy byte stream into a sequence of
//! CRC-verified frames, resynchronising on corruption.
//!
//! This is the generalization of the original firmware's byte-at-a-time
//! `streamHandler` / `checkStream` / `verifyHead` / `verifyData` pipeline:
//! bytes accumulate into a fixed buffer until a start-of-frame magic byte is
//! found and a full, length-declared frame follows it. A header that fails
//! to decode (bad CRC, bad version, an out-of-range length) does not stall
//! the stream — the leading byte is dropped and the search for the next
//! magic byte resumes, so one corrupted frame costs at most its own bytes.

use crate::cipher::Key;
use crate::frame::{self, FrameHeader, RawFrame};
use crate::private::*;

/// Running counters for stream health, exposed for diagnostics; nothing in
/// the dispatch path depends on their values.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeframerStats {
    /// Frames fully decoded and handed to the caller.
    pub frames_ok: u32,
    /// Candidate headers that failed CRC, version, or length validation.
    pub header_errors: u32,
    /// Frames whose header validated but whose payload CRC32 did not.
    pub frame_crc_errors: u32,
    /// Times the search for a start-of-frame magic byte had to skip ahead.
    pub resyncs: u32,
    /// Times the accumulation buffer filled before a frame completed and
    /// the oldest byte was dropped to make room.
    pub overflows: u32,
}

///
/// Byte-stream to frame-sequence state machine.
///
/// Feed bytes one at a time with [`Deframer::push`]; once it returns `true`
/// a complete candidate frame is buffered and [`Deframer::take`] extracts
/// and validates it. The two are split so extraction can borrow the
/// decoded frame without fighting the borrow checker over further pushes.
///
pub struct Deframer {
    buf: [u8; BUFFER_SIZE],
    len: usize,
    scratch: [u8; MAX_FRAME_SIZE],
    stats: DeframerStats,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deframer {
    pub fn new() -> Self {
        Self {
            buf: [0u8; BUFFER_SIZE],
            len: 0,
            scratch: [0u8; MAX_FRAME_SIZE],
            stats: DeframerStats::default(),
        }
    }

    /// Current stream health counters.
    pub fn stats(&self) -> DeframerStats {
        self.stats
    }

    /// Feed one byte received from the transport.
    ///
    /// Returns `true` once a complete, length-valid candidate frame sits at
    /// the front of the buffer, ready for [`Deframer::take`].
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len == BUFFER_SIZE {
            self.stats.overflows += 1;
            self.buf.copy_within(1.., 0);
            self.len -= 1;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        self.seek_candidate()
    }

    /// Scan the buffer for a usable candidate: a magic byte followed by a
    /// header that decodes cleanly and declares a length we've fully
    /// received. Drops bytes in front of the first byte that cannot start
    /// a valid frame, and keeps resyncing until either a candidate is ready
    /// or the buffer runs dry.
    fn seek_candidate(&mut self) -> bool {
        loop {
            let Some(start) = self.buf[..self.len].iter().position(|&b| b == MAGIC) else {
                self.len = 0;
                return false;
            };
            if start > 0 {
                self.stats.resyncs += 1;
                self.buf.copy_within(start..self.len, 0);
                self.len -= start;
            }

            if self.len < HEADER_SIZE {
                return false;
            }

            let mut header_bytes = [0u8; HEADER_SIZE];
            header_bytes.copy_from_slice(&self.buf[..HEADER_SIZE]);
            match FrameHeader::decode(&header_bytes) {
                Ok(header) => {
                    if self.len < header.length as usize {
                        return false;
                    }
                    return true;
                }
                Err(_) => {
                    self.stats.header_errors += 1;
                    self.buf.copy_within(1..self.len, 0);
                    self.len -= 1;
                }
            }
        }
    }

    /// Feed a whole chunk of received bytes, invoking `on_frame` once per
    /// candidate the chunk completes (whether it validates or not).
    ///
    /// Convenience wrapper around [`Deframer::push`]/[`Deframer::take`] for
    /// callers that receive bytes in bursts rather than one at a time; the
    /// two underlying methods stay the primitive, byte-at-a-time entry
    /// point used internally and available to callers (e.g. an ISR) that
    /// want to decide per-byte when to stop.
    pub fn feed(&mut self, bytes: &[u8], key: Option<&Key>, mut on_frame: impl FnMut(StdResult<RawFrame<'_>, WireError>)) {
        for &byte in bytes {
            if self.push(byte) {
                if let Some(result) = self.take(key) {
                    on_frame(result);
                }
            }
        }
    }

    /// Extract and fully validate the candidate frame [`Deframer::push`]
    /// just signalled, decrypting its payload if `key` is given.
    ///
    /// A candidate that validates is fully consumed from the buffer. A
    /// candidate that fails the frame CRC (or any later check) applies the
    /// same reuse policy as a failed header: only the leading byte is
    /// dropped and the rest stays buffered, since its tail may legitimately
    /// hold the start of the next real frame. Returns `None` if called
    /// without a ready candidate.
    pub fn take(&mut self, key: Option<&Key>) -> Option<StdResult<RawFrame<'_>, WireError>> {
        if self.len < HEADER_SIZE {
            return None;
        }
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&self.buf[..HEADER_SIZE]);
        let header = FrameHeader::decode(&header_bytes).ok()?;
        let total = header.length as usize;
        if self.len < total {
            return None;
        }

        self.scratch[..total].copy_from_slice(&self.buf[..total]);

        match frame::decode_frame(&mut self.scratch[..total], key) {
            Ok(frame) => {
                self.buf.copy_within(total..self.len, 0);
                self.len -= total;
                self.stats.frames_ok += 1;
                Some(Ok(frame))
            }
            Err(err) => {
                self.buf.copy_within(1..self.len, 0);
                self.len -= 1;
                if err == WireError::InvalidFrameCrc {
                    self.stats.frame_crc_errors += 1;
                } else {
                    self.stats.header_errors += 1;
                }
                Some(Err(err))
            }
        }
    }
}
