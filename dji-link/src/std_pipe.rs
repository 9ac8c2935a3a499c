//!
//! A `std`-only sample [`BytePipe`] used by this crate's own integration
//! tests and doc example.
//!
//! This is scaffolding for testing, not a production transport adapter —
//! a real serial port or UDP socket adapter belongs to the domain layer
//! built on top of this crate (see the crate-level docs' Non-goals).
//! [`LoopbackPipe::pair`] hands back two ends of one duplex channel so a
//! test can drive a `Link` on one end and a hand-rolled simulated peer on
//! the other, in separate threads if it wants to exercise
//! [`crate::Link::send_poll`]/[`crate::Link::read_poll`] concurrently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::pipe::BytePipe;

#[derive(Clone)]
struct Queue(Arc<Mutex<VecDeque<u8>>>);

impl Queue {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(VecDeque::new())))
    }

    fn push_slice(&self, data: &[u8]) {
        self.0.lock().unwrap().extend(data.iter().copied());
    }

    fn pop_into(&self, buf: &mut [u8]) -> usize {
        let mut queue = self.0.lock().unwrap();
        let n = queue.len().min(buf.len());
        for slot in buf[..n].iter_mut() {
            *slot = queue.pop_front().expect("n bounded by queue length");
        }
        n
    }
}

///
/// A loopback duplex byte pipe backed by two shared queues.
///
/// [`BytePipe::lock`]/[`BytePipe::unlock`] are a simple spin-lock over an
/// `AtomicBool`; [`BytePipe::millis`] reports elapsed time since the pair
/// was built via [`Instant::now`].
///
pub struct LoopbackPipe {
    outbound: Queue,
    inbound: Queue,
    start: Instant,
    locked: AtomicBool,
}

impl LoopbackPipe {
    /// Build two ends of one loopback channel: bytes sent on `a` are read
    /// from `b`, and vice versa. Both ends share the same start-of-time
    /// reference for `millis()`.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Queue::new();
        let b_to_a = Queue::new();
        let start = Instant::now();
        (
            Self {
                outbound: a_to_b.clone(),
                inbound: b_to_a.clone(),
                start,
                locked: AtomicBool::new(false),
            },
            Self {
                outbound: b_to_a,
                inbound: a_to_b,
                start,
                locked: AtomicBool::new(false),
            },
        )
    }
}

impl BytePipe for LoopbackPipe {
    fn send(&mut self, data: &[u8]) -> usize {
        self.outbound.push_slice(data);
        tracing::trace!(bytes = data.len(), "loopback send");
        data.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.inbound.pop_into(buf);
        if n > 0 {
            tracing::trace!(bytes = n, "loopback read");
        }
        n
    }

    fn millis(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    fn lock(&self) {
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}
