//!
//! The request-session and ack-cache tables keyed by session id.
//!
//! Two independent tables, both sized off [`SESSION_TABLE_NUM`], mirroring
//! the split the original onboard link firmware made between "outbound
//! reliable command bookkeeping" and "last-ack-per-session replay cache":
//!
//! - [`RequestTable`] tracks our own in-flight reliable sends: which
//!   session id they claimed, how many retries remain, and when the next
//!   retry or final timeout is due.
//! - [`AckCache`] remembers, per peer-assigned session id `1..32`, the most
//!   recently produced acknowledgement extent, so a duplicate request
//!   (peer didn't see our first ack) gets the *same* ack replayed instead
//!   of re-running the handler, while a request carrying a new sequence
//!   number supersedes the cached one.
//!
//! Neither table owns arena memory directly; they hold [`ExtentId`]
//! handles and hand back the ones that need freeing, leaving the arena
//! itself as the sole owner of bytes.

use crate::link::Outcome;
use crate::private::*;

/// Reserved session ids with fixed slots (`0`, `1`); everything `2..32` is
/// the auto-assigned reliable pool.
const FIXED_SESSIONS: usize = 2;

/// One outbound reliable send's bookkeeping.
///
/// Not `Copy`/`Clone`: it owns the borrowed completion callback for as
/// long as the session is in flight.
pub struct RequestSlot<'a> {
    pub session_id: u8,
    pub extent: ExtentId,
    pub sequence: u16,
    pub retries_left: u8,
    pub sent_at_ms: u64,
    pub timeout_ms: u32,
    callback: &'a mut dyn FnMut(Outcome<'_>),
}

enum RequestEntry<'a> {
    Free,
    Used(RequestSlot<'a>),
}

/// Table of in-flight outbound reliable sends, one per claimed session id.
pub struct RequestTable<'a> {
    slots: [RequestEntry<'a>; SESSION_TABLE_NUM],
}

impl<'a> Default for RequestTable<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> RequestTable<'a> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| RequestEntry::Free),
        }
    }

    /// Whether `session_id` is currently free.
    pub fn is_free(&self, session_id: u8) -> bool {
        matches!(self.slots[session_id as usize], RequestEntry::Free)
    }

    /// First unclaimed id in the auto-assigned reliable pool (`2..32`).
    pub fn first_free_reliable(&self) -> Option<u8> {
        (FIXED_SESSIONS..SESSION_TABLE_NUM)
            .find(|&i| self.is_free(i as u8))
            .map(|i| i as u8)
    }

    /// Claim a session id: `Some(0)` or `Some(1)` request that exact fixed
    /// slot, `None` auto-assigns the first free id in `2..32`.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if the requested fixed slot is occupied, or no
    /// auto-assigned slot is free.
    #[allow(clippy::too_many_arguments)]
    pub fn claim(
        &mut self,
        session_id: Option<u8>,
        extent: ExtentId,
        sequence: u16,
        retries_left: u8,
        sent_at_ms: u64,
        timeout_ms: u32,
        callback: &'a mut dyn FnMut(Outcome<'_>),
    ) -> Result<u8> {
        let id = match session_id {
            Some(id) if (id as usize) < FIXED_SESSIONS => {
                if matches!(self.slots[id as usize], RequestEntry::Used(_)) {
                    return Err(Error::Busy);
                }
                id
            }
            Some(_) | None => self.first_free_reliable().ok_or(Error::Busy)?,
        };

        self.slots[id as usize] = RequestEntry::Used(RequestSlot {
            session_id: id,
            extent,
            sequence,
            retries_left,
            sent_at_ms,
            timeout_ms,
            callback,
        });
        Ok(id)
    }

    /// Release a claimed session id, returning its extent and completion
    /// callback for the caller to free and invoke, respectively.
    pub fn release(&mut self, session_id: u8) -> Option<(ExtentId, &'a mut dyn FnMut(Outcome<'_>))> {
        match core::mem::replace(&mut self.slots[session_id as usize], RequestEntry::Free) {
            RequestEntry::Used(slot) => Some((slot.extent, slot.callback)),
            RequestEntry::Free => None,
        }
    }

    pub fn get(&self, session_id: u8) -> Option<&RequestSlot<'a>> {
        match &self.slots[session_id as usize] {
            RequestEntry::Used(slot) => Some(slot),
            RequestEntry::Free => None,
        }
    }

    /// Iterate mutably over every claimed slot, for the scheduler's
    /// retry/timeout sweep.
    pub fn iter_used_mut(&mut self) -> impl Iterator<Item = &mut RequestSlot<'a>> {
        self.slots.iter_mut().filter_map(|e| match e {
            RequestEntry::Used(slot) => Some(slot),
            RequestEntry::Free => None,
        })
    }
}

/// What a request-path lookup against the ack cache should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CacheLookup {
    /// No cached ack for this sequence: run the handler and [`AckCache::store`] its result.
    Fresh,
    /// This exact sequence was already acked: replay the cached extent verbatim.
    Replay(ExtentId),
}

#[derive(Clone, Copy)]
struct AckCacheSlot {
    sequence: Option<u16>,
    extent: Option<ExtentId>,
}

const EMPTY_CACHE_SLOT: AckCacheSlot = AckCacheSlot {
    sequence: None,
    extent: None,
};

/// Per-session last-ack replay cache, indexed by `session_id - 1` for
/// `session_id` in `1..32`.
pub struct AckCache {
    slots: [AckCacheSlot; ACK_TABLE_NUM],
}

impl Default for AckCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AckCache {
    pub fn new() -> Self {
        Self {
            slots: [EMPTY_CACHE_SLOT; ACK_TABLE_NUM],
        }
    }

    fn index(session_id: u8) -> usize {
        (session_id - 1) as usize
    }

    /// Check whether `sequence` on `session_id` has already been acked.
    ///
    /// Session id `0` (no-ack) never caches and always reports [`CacheLookup::Fresh`].
    pub fn lookup(&self, session_id: u8, sequence: u16) -> CacheLookup {
        if session_id == 0 {
            return CacheLookup::Fresh;
        }
        let slot = &self.slots[Self::index(session_id)];
        match (slot.sequence, slot.extent) {
            (Some(seq), Some(extent)) if seq == sequence => CacheLookup::Replay(extent),
            _ => CacheLookup::Fresh,
        }
    }

    /// Clear whatever is cached for `session_id`, returning its extent (if
    /// any) so the caller can free it *before* allocating the replacement —
    /// the superseding ack must free its predecessor before reallocating,
    /// not after.
    pub fn take(&mut self, session_id: u8) -> Option<ExtentId> {
        if session_id == 0 {
            return None;
        }
        let slot = &mut self.slots[Self::index(session_id)];
        slot.sequence = None;
        slot.extent.take()
    }

    /// Record a newly produced ack. Callers must have already superseded
    /// (via [`AckCache::take`]) whatever was cached before.
    pub fn store(&mut self, session_id: u8, sequence: u16, extent: ExtentId) {
        if session_id == 0 {
            return;
        }
        let slot = &mut self.slots[Self::index(session_id)];
        slot.sequence = Some(sequence);
        slot.extent = Some(extent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_extent(n: usize) -> ExtentId {
        ExtentId(n)
    }

    #[test]
    fn fixed_session_claim_and_busy() {
        let mut table = RequestTable::new();
        let mut cb = |_: Outcome<'_>| {};
        table.claim(Some(0), dummy_extent(1), 1, 0, 0, 100, &mut cb).unwrap();
        let err = table
            .claim(Some(0), dummy_extent(2), 2, 0, 0, 100, &mut cb)
            .unwrap_err();
        assert_eq!(err, Error::Busy);
    }

    #[test]
    fn auto_assignment_picks_first_free_reliable_slot() {
        let mut table = RequestTable::new();
        let mut cb = |_: Outcome<'_>| {};
        let first = table.claim(None, dummy_extent(1), 1, 3, 0, 100, &mut cb).unwrap();
        assert_eq!(first, 2);
        let second = table.claim(None, dummy_extent(2), 2, 3, 0, 100, &mut cb).unwrap();
        assert_eq!(second, 3);
    }

    #[test]
    fn release_frees_the_slot_and_returns_its_extent() {
        let mut table = RequestTable::new();
        let mut cb = |_: Outcome<'_>| {};
        let id = table.claim(None, dummy_extent(9), 1, 3, 0, 100, &mut cb).unwrap();
        let (extent, _callback) = table.release(id).unwrap();
        assert_eq!(extent, dummy_extent(9));
        assert!(table.get(id).is_none());
    }

    #[test]
    fn release_invokes_through_the_returned_callback() {
        let mut table = RequestTable::new();
        let mut fired = false;
        {
            let mut cb = |outcome: Outcome<'_>| {
                fired = matches!(outcome, Outcome::Cancelled);
            };
            let id = table.claim(None, dummy_extent(1), 1, 0, 0, 100, &mut cb).unwrap();
            let (_extent, callback) = table.release(id).unwrap();
            callback(Outcome::Cancelled);
        }
        assert!(fired);
    }

    #[test]
    fn ack_cache_replays_duplicate_sequence_and_supersedes_new_one() {
        let mut cache = AckCache::new();
        assert_eq!(cache.lookup(5, 10), CacheLookup::Fresh);
        cache.store(5, 10, dummy_extent(1));
        assert_eq!(cache.lookup(5, 10), CacheLookup::Replay(dummy_extent(1)));

        let previous = cache.take(5);
        assert_eq!(previous, Some(dummy_extent(1)));
        cache.store(5, 11, dummy_extent(2));
        assert_eq!(cache.lookup(5, 10), CacheLookup::Fresh);
        assert_eq!(cache.lookup(5, 11), CacheLookup::Replay(dummy_extent(2)));
    }

    #[test]
    fn session_zero_never_caches() {
        let mut cache = AckCache::new();
        assert_eq!(cache.take(0), None);
        cache.store(0, 1, dummy_extent(1));
        assert_eq!(cache.lookup(0, 1), CacheLookup::Fresh);
    }
}
