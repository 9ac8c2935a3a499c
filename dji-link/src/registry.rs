//!
//! The (command set, command id) → handler table consulted by the request
//! path.
//!
//! A fixed-capacity table of [`MAX_HANDLERS`] entries, borrowed rather than
//! boxed: the embedder registers a closure that lives at least as long as
//! the [`crate::Link`] itself, mirroring how the original firmware bound
//! static dispatch functions once at module init and never tore them down.

use crate::link::Req;
use crate::private::*;

/// A request-path handler: receives the inbound payload and a [`Req`]
/// handle it may pass back to [`crate::Link::ack`] to reply.
///
/// Blanket-implemented for any `FnMut(Req, &[u8])`, so a plain closure can
/// be registered directly.
pub trait Handler {
    fn handle(&mut self, req: Req, payload: &[u8]);
}

impl<F: FnMut(Req, &[u8])> Handler for F {
    fn handle(&mut self, req: Req, payload: &[u8]) {
        (self)(req, payload)
    }
}

struct Entry<'a> {
    cmd_set: u8,
    cmd_id: u8,
    handler: &'a mut dyn Handler,
}

/// Table of registered request-path handlers.
pub struct Registry<'a> {
    entries: [Option<Entry<'a>>; MAX_HANDLERS],
}

impl<'a> Default for Registry<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Registry<'a> {
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|_| None),
        }
    }

    /// Bind `handler` to `(cmd_set, cmd_id)`. Later registrations for the
    /// same pair do not replace earlier ones; the first match wins on
    /// dispatch, per [`Registry::dispatch`].
    ///
    /// # Errors
    ///
    /// [`Error::HandlerTableFull`] if every slot is already taken.
    pub fn register(&mut self, cmd_set: u8, cmd_id: u8, handler: &'a mut dyn Handler) -> Result<()> {
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.is_none())
            .ok_or(Error::HandlerTableFull)?;
        *slot = Some(Entry { cmd_set, cmd_id, handler });
        Ok(())
    }

    /// Invoke the first registered handler matching `(cmd_set, cmd_id)`.
    /// Returns whether a handler was found and invoked.
    pub fn dispatch(&mut self, cmd_set: u8, cmd_id: u8, req: Req, payload: &[u8]) -> bool {
        for entry in self.entries.iter_mut().flatten() {
            if entry.cmd_set == cmd_set && entry.cmd_id == cmd_id {
                entry.handler.handle(req, payload);
                return true;
            }
        }
        false
    }
}
