//! Cross-module scenario tests driving a pair of [`Link`]s over a
//! [`LoopbackPipe`], exercising the concrete scenarios and testable
//! properties that no single module's unit tests can see on their own:
//! retry/ack/timeout sequencing, sequence-number stability across
//! retransmissions, shutdown cancellation, and deframer resynchronisation
//! reached through the public byte-handler entry point.
//!
//! These need the `std`-gated sample pipe, so the whole file is a no-op
//! (zero tests) unless the `std` feature is enabled.
#![cfg(feature = "std")]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use dji_link::frame::{encode_frame, FrameHeader};
use dji_link::pipe::BytePipe;
use dji_link::std_pipe::LoopbackPipe;
use dji_link::{Command, Link, Outcome, Req, SessionMode, CMD_SET_BROADCAST, MAX_FRAME_SIZE};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Wraps one end of a [`LoopbackPipe`], recording the sequence number of
/// every attempted transmission and silently swallowing the first
/// `drop_first` of them — standing in for a peer that never saw a
/// command's initial transmission.
struct FlakyPipe {
    inner: LoopbackPipe,
    drop_first: usize,
    seen: usize,
    sequences: Rc<RefCell<Vec<u16>>>,
}

impl BytePipe for FlakyPipe {
    fn send(&mut self, data: &[u8]) -> usize {
        if data.len() >= 12 {
            let mut header = [0u8; 12];
            header.copy_from_slice(&data[..12]);
            if let Ok(h) = FrameHeader::decode(&header) {
                self.sequences.borrow_mut().push(h.sequence);
            }
        }
        self.seen += 1;
        if self.seen <= self.drop_first {
            return data.len();
        }
        self.inner.send(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.inner.read(buf)
    }

    fn millis(&self) -> u32 {
        self.inner.millis()
    }

    fn lock(&self) {
        self.inner.lock()
    }

    fn unlock(&self) {
        self.inner.unlock()
    }
}

#[test]
fn no_ack_send_completes_synchronously_and_leaves_the_arena_empty() {
    init_tracing();
    let (pipe, _peer) = LoopbackPipe::pair();

    let mut acked = false;
    let mut callback = |o: Outcome<'_>| acked = matches!(o, Outcome::Ack(_));

    let mut link = Link::new(pipe);
    link.send(Command {
        session_mode: SessionMode::NoAck,
        encrypt: false,
        cmd_set: 0x01,
        cmd_id: 0x02,
        payload: b"ping",
        callback: &mut callback,
    })
    .unwrap();

    assert!(acked);
    assert_eq!(link.arena_used(), 0);
}

#[test]
fn ack_once_send_completes_synchronously_without_waiting_for_a_peer() {
    init_tracing();
    let (pipe, _peer) = LoopbackPipe::pair();

    let mut acked = false;
    let mut callback = |o: Outcome<'_>| acked = matches!(o, Outcome::Ack(_));

    let mut link = Link::new(pipe);
    link.send(Command {
        session_mode: SessionMode::AckOnce,
        encrypt: false,
        cmd_set: 0x01,
        cmd_id: 0x02,
        payload: b"hello",
        callback: &mut callback,
    })
    .unwrap();

    assert!(acked);
    assert_eq!(link.arena_used(), 0);
}

#[test]
fn reliable_send_is_acked_once_a_registered_handler_replies() {
    init_tracing();
    let (pipe_a, pipe_b) = LoopbackPipe::pair();

    let pending: RefCell<Option<(Req, Vec<u8>)>> = RefCell::new(None);
    let mut handler = |req: Req, payload: &[u8]| {
        *pending.borrow_mut() = Some((req, payload.to_vec()));
    };

    let mut outcome: Option<Vec<u8>> = None;
    let mut callback = |o: Outcome<'_>| {
        if let Outcome::Ack(payload) = o {
            outcome = Some(payload.to_vec());
        }
    };

    let mut link_a = Link::new(pipe_a);
    let mut link_b = Link::new(pipe_b);
    link_b.register_handler(0x10, 0x01, &mut handler).unwrap();

    link_a
        .send(Command {
            session_mode: SessionMode::Reliable {
                retries: 3,
                timeout_ms: 100,
            },
            encrypt: false,
            cmd_set: 0x10,
            cmd_id: 0x01,
            payload: b"ping",
            callback: &mut callback,
        })
        .unwrap();

    link_b.read_poll();
    let (req, payload) = pending.borrow_mut().take().expect("handler ran");
    assert_eq!(payload, b"ping");
    link_b.ack(req, b"pong").unwrap();

    link_a.read_poll();
    assert_eq!(outcome, Some(b"pong".to_vec()));
}

#[test]
fn reliable_send_retransmits_with_the_same_sequence_until_acked() {
    init_tracing();
    let (pipe_a, pipe_b) = LoopbackPipe::pair();
    let sequences = Rc::new(RefCell::new(Vec::new()));
    let flaky = FlakyPipe {
        inner: pipe_a,
        drop_first: 1,
        seen: 0,
        sequences: sequences.clone(),
    };

    let pending: RefCell<Option<(Req, Vec<u8>)>> = RefCell::new(None);
    let mut handler = |req: Req, payload: &[u8]| {
        *pending.borrow_mut() = Some((req, payload.to_vec()));
    };

    let mut outcome: Option<Vec<u8>> = None;
    let mut callback = |o: Outcome<'_>| {
        if let Outcome::Ack(payload) = o {
            outcome = Some(payload.to_vec());
        }
    };

    let mut link_a = Link::new(flaky);
    let mut link_b = Link::new(pipe_b);
    link_b.register_handler(0x10, 0x01, &mut handler).unwrap();

    link_a
        .send(Command {
            session_mode: SessionMode::Reliable {
                retries: 3,
                timeout_ms: 30,
            },
            encrypt: false,
            cmd_set: 0x10,
            cmd_id: 0x01,
            payload: b"ping",
            callback: &mut callback,
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_millis(1_000);
    while outcome.is_none() && Instant::now() < deadline {
        link_a.send_poll();
        link_b.read_poll();
        if let Some((req, payload)) = pending.borrow_mut().take() {
            assert_eq!(payload, b"ping");
            link_b.ack(req, b"pong").unwrap();
        }
        link_a.read_poll();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(outcome, Some(b"pong".to_vec()));

    let seqs = sequences.borrow();
    assert!(
        seqs.len() >= 2,
        "expected the dropped first transmission plus at least one retry, saw {seqs:?}"
    );
    assert!(
        seqs.windows(2).all(|w| w[0] == w[1]),
        "sequence number changed across retransmissions: {seqs:?}"
    );
}

#[test]
fn reliable_send_times_out_after_exhausting_its_retry_budget() {
    init_tracing();
    let (pipe_a, _peer) = LoopbackPipe::pair();

    let mut outcome = None;
    let mut callback = |o: Outcome<'_>| {
        outcome = Some(matches!(o, Outcome::Timeout));
    };

    let mut link_a = Link::new(pipe_a);
    link_a
        .send(Command {
            session_mode: SessionMode::Reliable {
                retries: 2,
                timeout_ms: 30,
            },
            encrypt: false,
            cmd_set: 0x10,
            cmd_id: 0x01,
            payload: b"ping",
            callback: &mut callback,
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_millis(1_000);
    while outcome.is_none() && Instant::now() < deadline {
        link_a.send_poll();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(outcome, Some(true));
    assert_eq!(link_a.arena_used(), 0);
}

#[test]
fn shutdown_cancels_a_pending_reliable_session_exactly_once() {
    init_tracing();
    let (pipe_a, _peer) = LoopbackPipe::pair();

    let mut outcome = None;
    let mut callback = |o: Outcome<'_>| outcome = Some(matches!(o, Outcome::Cancelled));

    {
        let mut link_a = Link::new(pipe_a);
        link_a
            .send(Command {
                session_mode: SessionMode::Reliable {
                    retries: 5,
                    timeout_ms: 10_000,
                },
                encrypt: false,
                cmd_set: 0x10,
                cmd_id: 0x01,
                payload: b"ping",
                callback: &mut callback,
            })
            .unwrap();
        // `link_a` drops here, running `Drop::drop` -> `shutdown`.
    }

    assert_eq!(outcome, Some(true));
}

#[test]
fn byte_handler_resyncs_past_garbage_and_still_delivers_a_broadcast() {
    init_tracing();
    let (pipe_a, _peer) = LoopbackPipe::pair();

    let mut seen: Option<Vec<u8>> = None;
    let mut broadcast = |payload: &[u8]| seen = Some(payload.to_vec());

    let mut link_a = Link::new(pipe_a);
    link_a.set_broadcast_handler(&mut broadcast);

    let mut buf = [0u8; MAX_FRAME_SIZE];
    let payload = [CMD_SET_BROADCAST, 0x00, 0x7A];
    let size = encode_frame(&mut buf, 0, false, 1, &payload, false, None).unwrap();

    // Noise ahead of the real frame, including a stray magic byte that does
    // not begin a valid header: the deframer must resync past it rather
    // than losing the frame that follows.
    for &b in &[0x11, 0x22, dji_link::MAGIC, 0x00] {
        link_a.byte_handler(b);
    }
    for &b in &buf[..size] {
        link_a.byte_handler(b);
    }

    assert_eq!(seen.as_deref(), Some(&[0x7A][..]));
    assert_eq!(link_a.deframer_stats().frames_ok, 1);
}

#[test]
fn duplicate_request_replays_the_cached_ack_without_rerunning_the_handler() {
    init_tracing();
    let (pipe_a, _peer) = LoopbackPipe::pair();

    let invocations = Rc::new(RefCell::new(0u32));
    let pending: RefCell<Option<Req>> = RefCell::new(None);
    let invocations_seen = invocations.clone();
    let mut handler = |req: Req, _payload: &[u8]| {
        *invocations_seen.borrow_mut() += 1;
        *pending.borrow_mut() = Some(req);
    };

    let mut link = Link::new(pipe_a);
    link.register_handler(0x10, 0x01, &mut handler).unwrap();

    let mut buf = [0u8; MAX_FRAME_SIZE];
    let payload = [0x10, 0x01, 0xAB];
    let size = encode_frame(&mut buf, 5, false, 42, &payload, false, None).unwrap();

    for &b in &buf[..size] {
        link.byte_handler(b);
    }
    let req = pending.borrow_mut().take().expect("handler ran on the first delivery");
    link.ack(req, b"ok").unwrap();

    // The same (session, sequence) arriving again must replay the cached
    // ack rather than invoking the handler a second time.
    for &b in &buf[..size] {
        link.byte_handler(b);
    }

    assert_eq!(
        *invocations.borrow(),
        1,
        "handler must not rerun for a duplicate (session, sequence) once acked"
    );
}
