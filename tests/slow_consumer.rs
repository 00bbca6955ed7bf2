//! End-to-end scenario 2: a destination that never drains its pipe buffer
//! eventually has packets dropped from the writer's backlog rather than
//! growing it without bound.

use daemon_runtime::error::{Result, RuntimeError};
use daemon_runtime::event::EventLoop;
use daemon_runtime::io::{pipe, Io};
use daemon_runtime::writer::{WriteOutcome, Writer};
use std::os::unix::io::RawFd;

struct NeverReadFrom {
    inner: daemon_runtime::io::PipeWriter,
}

impl Io for NeverReadFrom {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(RuntimeError::NotSupported("read".to_owned()))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf)
    }

    fn handle(&self) -> RawFd {
        self.inner.handle()
    }
}

#[test]
fn backlog_caps_and_accounts_for_every_packet() {
    let event_loop = EventLoop::new().unwrap();
    // Nobody ever reads the other end, so once the kernel pipe buffer
    // fills every further write reports `WouldBlock`.
    let (_reader, writer_half) = pipe(false, true).unwrap();
    let io = NeverReadFrom { inner: writer_half };

    let writer = Writer::new(
        Box::new(io),
        event_loop.registry(),
        "packet",
        "slow-consumer",
        Box::new(|| {}),
    )
    .unwrap();

    const TOTAL: usize = 40_000;
    const PACKET_LEN: usize = 64;
    // Randomized payload bytes rather than a fixed fill value, so this
    // doesn't accidentally pass only because the kernel pipe buffer
    // happens to compress or short-circuit a repeated byte.
    use rand::Rng;
    let mut rng = rand::rng();
    let packet: Vec<u8> = (0..PACKET_LEN).map(|_| rng.random()).collect();

    let mut direct = 0usize;
    let mut queued = 0usize;
    for _ in 0..TOTAL {
        match writer.write(&packet).unwrap() {
            WriteOutcome::Direct => direct += 1,
            WriteOutcome::Queued => queued += 1,
        }
    }

    let backlog_len = writer.backlog_len();
    let dropped = writer.dropped_packets();

    // Every packet is accounted for exactly once: sent directly, still
    // sitting in the backlog, or dropped from it.
    assert_eq!(direct + queued, TOTAL);
    assert_eq!(backlog_len as u64 + dropped, queued as u64);
    assert!(backlog_len <= 32_768);
    if dropped > 0 {
        assert_eq!(backlog_len, 32_768);
        assert_eq!(dropped, (queued - backlog_len) as u64);
    }
}
