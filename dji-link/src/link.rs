//!
//! [`Link`], the top-level object tying frame codec, arena, session table,
//! deframer, and dispatcher together behind the public send/ack/register
//! surface and the two cooperative polls the embedder drives.
//!
//! This is the generalization of the original onboard link firmware's
//! `API` object: one value owning the pipe, the arena, both session
//! tables, and the deframer, exposing `send`/`ack`/`sendPoll`/`readPoll`/
//! `byteHandler` as inherent methods instead of free functions closing
//! over a global instance.

use crate::cipher::Key;
use crate::deframer::Deframer;
use crate::frame::{self, FrameHeader};
use crate::pipe::BytePipe;
use crate::private::*;
use crate::registry::{Handler, Registry};
use crate::session::{AckCache, CacheLookup, RequestTable};

/// How a [`Command`] expects to be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionMode {
    /// Fire and forget: session id `0`, no bookkeeping, callback fires
    /// with a synthetic success as soon as the frame is handed to the pipe.
    NoAck,
    /// Session id `1`, exclusive: transmitted once, callback fires with a
    /// synthetic success immediately; no retry, no wait for a real ack.
    AckOnce,
    /// Session id auto-assigned from `2..32`; retried up to `retries`
    /// times at `timeout_ms` spacing, same sequence number every time.
    Reliable { retries: u8, timeout_ms: u32 },
}

/// The result delivered to a command's completion callback.
///
/// Not a [`Error`]: timeout and cancellation are not call-site failures,
/// they are the normal conclusion of a reliable send that never got an
/// answer.
#[derive(Debug)]
pub enum Outcome<'a> {
    /// The peer (or, for [`SessionMode::NoAck`]/[`SessionMode::AckOnce`], the
    /// local transmit itself) acknowledged the command with this payload.
    Ack(&'a [u8]),
    /// A [`SessionMode::Reliable`] send exhausted its retry budget.
    Timeout,
    /// The [`Link`] was shut down while this command was still pending.
    Cancelled,
}

/// A logical outbound request.
///
/// `payload` is the command's own data, *not* prefixed with
/// `cmd_set`/`cmd_id` — [`Link::send`] stitches that prefix on before
/// framing, mirroring how the dispatcher strips it back off on receive
/// (see [`crate::catalogue`]).
pub struct Command<'p, 'cb> {
    pub session_mode: SessionMode,
    pub encrypt: bool,
    pub cmd_set: u8,
    pub cmd_id: u8,
    pub payload: &'p [u8],
    pub callback: &'cb mut dyn FnMut(Outcome<'_>),
}

/// Opaque (session id, sequence number) handle passed to request-path
/// handlers so they can call [`Link::ack`] later in the same poll
/// invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Req {
    session_id: u8,
    sequence: u16,
}

impl Req {
    pub(crate) fn new(session_id: u8, sequence: u16) -> Self {
        Self { session_id, sequence }
    }
}

/// Stitch `cmd_set`/`cmd_id` onto `data` into `buf`, returning the used length.
fn assemble_payload(cmd_set: u8, cmd_id: u8, data: &[u8], buf: &mut [u8; MAX_PAYLOAD_SIZE]) -> Result<usize> {
    let total = 2 + data.len();
    if total > MAX_PAYLOAD_SIZE {
        return Err(Error::InvalidArgument);
    }
    buf[0] = cmd_set;
    buf[1] = cmd_id;
    buf[2..total].copy_from_slice(data);
    Ok(total)
}

///
/// Transport and session core bound to one [`BytePipe`].
///
/// Every closure handed to `Link` — handlers, the broadcast/transparent
/// channels, a reliable command's completion callback — is borrowed for
/// `'a`: `Link<'a, P>` cannot outlive whatever the embedder registered,
/// so in practice the closures are declared before the `Link` and both go
/// out of scope together.
///
pub struct Link<'a, P: BytePipe> {
    pipe: P,
    arena: Arena,
    requests: RequestTable<'a>,
    ack_cache: AckCache,
    deframer: Deframer,
    registry: Registry<'a>,
    broadcast: Option<&'a mut dyn FnMut(&[u8])>,
    transparent: Option<&'a mut dyn FnMut(&[u8])>,
    key: Option<Key>,
    seq: u16,
}

impl<'a, P: BytePipe> Link<'a, P> {
    /// Build a `Link` over an embedder-supplied pipe. No key installed,
    /// no handlers registered.
    pub fn new(pipe: P) -> Self {
        Self {
            pipe,
            arena: Arena::new(),
            requests: RequestTable::new(),
            ack_cache: AckCache::new(),
            deframer: Deframer::new(),
            registry: Registry::new(),
            broadcast: None,
            transparent: None,
            key: None,
            seq: 0,
        }
    }

    /// Install the symmetric key used for encrypted sends and receives.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKeyLength`] if `bytes` is not 16 bytes.
    pub fn set_key(&mut self, bytes: &[u8]) -> Result<()> {
        self.key = Some(Key::new(bytes)?);
        Ok(())
    }

    /// Bind `handler` to `(cmd_set, cmd_id)` on the request path.
    ///
    /// # Errors
    ///
    /// [`Error::HandlerTableFull`] if the registry has no free slot.
    pub fn register_handler(&mut self, cmd_set: u8, cmd_id: u8, handler: &'a mut dyn Handler) -> Result<()> {
        self.pipe.lock();
        let result = self.registry.register(cmd_set, cmd_id, handler);
        self.pipe.unlock();
        result
    }

    /// Bind the well-known broadcast push channel (command set
    /// [`crate::CMD_SET_BROADCAST`]). Delivered with no ack expected.
    pub fn set_broadcast_handler(&mut self, handler: &'a mut dyn FnMut(&[u8])) {
        self.pipe.lock();
        self.broadcast = Some(handler);
        self.pipe.unlock();
    }

    /// Bind the well-known transparent-transmission push channel (command id
    /// [`crate::CMD_ID_FROM_MOBILE`] within [`crate::CMD_SET_BROADCAST`]).
    /// Delivered with no ack expected.
    pub fn set_transparent_handler(&mut self, handler: &'a mut dyn FnMut(&[u8])) {
        self.pipe.lock();
        self.transparent = Some(handler);
        self.pipe.unlock();
    }

    /// Arena bytes currently live, for diagnostics and tests.
    pub fn arena_used(&self) -> usize {
        self.arena.used()
    }

    /// Stream-health counters from the deframer.
    pub fn deframer_stats(&self) -> crate::deframer::DeframerStats {
        self.deframer.stats()
    }

    fn next_sequence(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Enqueue an outbound command.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an oversized payload, [`Error::Busy`]
    /// if the requested or auto-assigned session id is taken,
    /// [`Error::OutOfMemory`] if the arena cannot satisfy the allocation,
    /// [`Error::NoKey`] if `command.encrypt` is set but no key is installed.
    pub fn send(&mut self, command: Command<'_, 'a>) -> Result<()> {
        self.pipe.lock();
        let result = self.send_locked(command);
        self.pipe.unlock();
        result
    }

    fn send_locked(&mut self, command: Command<'_, 'a>) -> Result<()> {
        if command.encrypt && self.key.is_none() {
            return Err(Error::NoKey);
        }

        let mut wire = [0u8; MAX_PAYLOAD_SIZE];
        let wire_len = assemble_payload(command.cmd_set, command.cmd_id, command.payload, &mut wire)?;
        let wire_payload = &wire[..wire_len];

        match command.session_mode {
            SessionMode::NoAck => self.send_fire_and_forget(SESSION_NO_ACK, wire_payload, command.encrypt, command.callback),
            SessionMode::AckOnce => {
                self.send_fire_and_forget(SESSION_ACK_ONCE, wire_payload, command.encrypt, command.callback)
            }
            SessionMode::Reliable { retries, timeout_ms } => {
                self.send_reliable(wire_payload, command.encrypt, retries, timeout_ms, command.callback)
            }
        }
    }

    /// Shared tail of [`SessionMode::NoAck`] and [`SessionMode::AckOnce`]:
    /// allocate, encode, transmit, free, and report synthetic success —
    /// no session-table bookkeeping, since under `&mut self` exclusivity
    /// there is never a genuinely concurrent send to race against.
    fn send_fire_and_forget(
        &mut self,
        session_id: u8,
        payload: &[u8],
        encrypt: bool,
        callback: &mut dyn FnMut(Outcome<'_>),
    ) -> Result<()> {
        let size = frame::encoded_len(payload.len(), encrypt);
        let extent = self.arena.alloc(size)?;
        let sequence = self.next_sequence();
        {
            let buf = self.arena.get_mut(extent);
            frame::encode_frame(buf, session_id, false, sequence, payload, encrypt, self.key.as_ref())
                .expect("extent sized to fit the encoded frame");
        }
        self.pipe.send(self.arena.get(extent));
        self.arena.free(extent);
        callback(Outcome::Ack(&[]));
        Ok(())
    }

    fn send_reliable(
        &mut self,
        payload: &[u8],
        encrypt: bool,
        retries: u8,
        timeout_ms: u32,
        callback: &'a mut dyn FnMut(Outcome<'_>),
    ) -> Result<()> {
        let id = self.requests.first_free_reliable().ok_or(Error::Busy)?;
        let size = frame::encoded_len(payload.len(), encrypt);
        let extent = self.arena.alloc(size)?;
        let sequence = self.next_sequence();
        {
            let buf = self.arena.get_mut(extent);
            frame::encode_frame(buf, id, false, sequence, payload, encrypt, self.key.as_ref())
                .expect("extent sized to fit the encoded frame");
        }
        let now = self.pipe.millis() as u64;
        self.requests
            .claim(Some(id), extent, sequence, retries, now, timeout_ms, callback)
            .expect("session id availability was just checked");
        self.pipe.send(self.arena.get(extent));
        Ok(())
    }

    /// Reply to an in-progress request. Re-uses the session id and
    /// sequence number captured in `req`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `payload` is too large,
    /// [`Error::OutOfMemory`] if the arena cannot hold the encoded ack.
    pub fn ack(&mut self, req: Req, payload: &[u8]) -> Result<()> {
        self.pipe.lock();
        let result = self.ack_locked(req, payload);
        self.pipe.unlock();
        result
    }

    fn ack_locked(&mut self, req: Req, payload: &[u8]) -> Result<()> {
        if let Some(previous) = self.ack_cache.take(req.session_id) {
            self.arena.free(previous);
        }
        let size = frame::encoded_len(payload.len(), false);
        let extent = self.arena.alloc(size)?;
        {
            let buf = self.arena.get_mut(extent);
            frame::encode_frame(buf, req.session_id, true, req.sequence, payload, false, None)
                .expect("extent sized to fit the encoded frame");
        }
        self.ack_cache.store(req.session_id, req.sequence, extent);
        self.pipe.send(self.arena.get(extent));
        Ok(())
    }

    /// Drive retries and timeouts for every in-flight reliable session.
    /// Intended to be called by the embedder at ≥ 100 Hz.
    pub fn send_poll(&mut self) {
        self.pipe.lock();
        let now = self.pipe.millis() as u64;

        let mut expired = [0u8; SESSION_TABLE_NUM];
        let mut expired_len = 0;

        for slot in self.requests.iter_used_mut() {
            let elapsed = now.saturating_sub(slot.sent_at_ms);
            if elapsed < slot.timeout_ms as u64 {
                continue;
            }
            if slot.retries_left == 0 {
                expired[expired_len] = slot.session_id;
                expired_len += 1;
                continue;
            }
            slot.retries_left -= 1;
            slot.sent_at_ms = now;
            self.pipe.send(self.arena.get(slot.extent));
            #[cfg(feature = "log")]
            debug!("Retransmitting session {} seq {}", slot.session_id, slot.sequence);
        }

        for &id in &expired[..expired_len] {
            if let Some((extent, callback)) = self.requests.release(id) {
                self.arena.free(extent);
                callback(Outcome::Timeout);
            }
        }

        self.pipe.unlock();
    }

    /// Drain any bytes immediately available from the pipe and feed them
    /// to the deframer. Intended to be called continuously by the
    /// embedder's scheduling substrate.
    pub fn read_poll(&mut self) {
        self.pipe.lock();
        let mut buf = [0u8; 64];
        loop {
            let n = self.pipe.read(&mut buf);
            if n == 0 {
                break;
            }
            for &b in &buf[..n] {
                self.ingest_byte(b);
            }
        }
        self.pipe.unlock();
    }

    /// Feed one byte directly into the deframer, bypassing [`Link::read_poll`]
    /// — for embedders that can intercept bytes at a lower level (e.g. an
    /// ISR). Safe to interleave with [`Link::send_poll`] and [`Link::read_poll`];
    /// all three take the pipe's coarse lock.
    pub fn byte_handler(&mut self, byte: u8) {
        self.pipe.lock();
        self.ingest_byte(byte);
        self.pipe.unlock();
    }

    fn ingest_byte(&mut self, byte: u8) {
        if !self.deframer.push(byte) {
            return;
        }
        let Some(result) = self.deframer.take(self.key.as_ref()) else {
            return;
        };
        let Ok(frame) = result else {
            // Counted internally by the deframer's stats; never surfaced.
            return;
        };
        let header = frame.header;
        let len = frame.payload().len();
        let mut payload_buf = [0u8; MAX_PAYLOAD_SIZE];
        payload_buf[..len].copy_from_slice(frame.payload());
        self.dispatch(header, &payload_buf[..len]);
    }

    fn dispatch(&mut self, header: FrameHeader, payload: &[u8]) {
        if header.ack {
            self.dispatch_ack(header, payload);
        } else {
            self.dispatch_request(header, payload);
        }
    }

    fn dispatch_ack(&mut self, header: FrameHeader, payload: &[u8]) {
        let session_id = header.session_id;
        if session_id == 0 || session_id >= SESSION_AUTO {
            return;
        }
        let matches_pending = matches!(self.requests.get(session_id), Some(slot) if slot.sequence == header.sequence);
        if !matches_pending {
            #[cfg(feature = "log")]
            warn!("Unexpected ack: session {} seq {}", session_id, header.sequence);
            return;
        }
        if let Some((extent, callback)) = self.requests.release(session_id) {
            self.arena.free(extent);
            callback(Outcome::Ack(payload));
        }
    }

    fn dispatch_request(&mut self, header: FrameHeader, payload: &[u8]) {
        if payload.len() < 2 {
            return;
        }
        let cmd_set = payload[0];
        let cmd_id = payload[1];
        let body = &payload[2..];

        if cmd_set == CMD_SET_BROADCAST {
            if cmd_id == CMD_ID_FROM_MOBILE {
                if let Some(handler) = self.transparent.as_deref_mut() {
                    handler(body);
                }
            } else if let Some(handler) = self.broadcast.as_deref_mut() {
                handler(body);
            }
            return;
        }

        let session_id = header.session_id;
        let sequence = header.sequence;
        if (1..SESSION_AUTO).contains(&session_id) {
            if let CacheLookup::Replay(extent) = self.ack_cache.lookup(session_id, sequence) {
                self.pipe.send(self.arena.get(extent));
                return;
            }
        }

        let req = Req::new(session_id, sequence);
        self.registry.dispatch(cmd_set, cmd_id, req, body);
    }

    /// Release every pending reliable session, invoking each completion
    /// callback with [`Outcome::Cancelled`] exactly once. Idempotent.
    pub fn shutdown(&mut self) {
        self.pipe.lock();

        let mut ids = [0u8; SESSION_TABLE_NUM];
        let mut len = 0;
        for slot in self.requests.iter_used_mut() {
            ids[len] = slot.session_id;
            len += 1;
        }

        for &id in &ids[..len] {
            if let Some((extent, callback)) = self.requests.release(id) {
                self.arena.free(extent);
                callback(Outcome::Cancelled);
            }
        }

        self.pipe.unlock();
    }
}

impl<'a, P: BytePipe> Drop for Link<'a, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
