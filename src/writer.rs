//! Buffered packet writer for I/O-backed recipients.
//!
//! Wraps an [`Io`] so callers can push packets without blocking: a packet is
//! written directly when the backlog is empty, queued when the destination
//! isn't ready, and the event loop is told to wake the writer back up once
//! `WRITABLE` fires. A destination that can't keep up has its oldest queued
//! packets dropped rather than growing the backlog without bound.

use crate::error::{Result, RuntimeError};
use crate::event::{Interest, Registry, SourceKind, Token};
use crate::io::Io;
use crate::sync::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Backlog entries beyond this count are dropped, oldest first.
const MAX_QUEUED_WRITES: usize = 32768;

/// Outcome of a successful [`Writer::write`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The whole packet went out immediately; nothing was queued.
    Direct,
    /// The destination wasn't ready (or only took part of the packet); the
    /// remainder now lives in the backlog and will be flushed as `WRITABLE`
    /// fires.
    Queued,
}

struct State {
    io: Box<dyn Io>,
    backlog: VecDeque<Vec<u8>>,
    dropped_packets: u64,
}

struct Shared {
    state: Mutex<State>,
    registry: Registry,
    token: Token,
    recipient_name: String,
    packet_type: &'static str,
    on_disconnect: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

/// A buffered, non-blocking writer over one [`Io`] handle.
///
/// Cloning a `Writer` is not supported directly; instead hand out the result
/// of [`handle`](Writer::handle) to anything that needs to push packets
/// concurrently with the owner.
pub struct Writer {
    shared: Arc<Shared>,
}

/// A cheaply cloneable handle to push packets through a [`Writer`] from
/// another thread.
#[derive(Clone)]
pub struct WriterHandle {
    shared: Arc<Shared>,
}

impl Writer {
    /// Wraps `io` as a buffered writer, registering it as a generic source
    /// with no interest armed (readability, if wanted, is the caller's own
    /// registration). `on_disconnect` is invoked at most once, the first
    /// time a write to the destination fails for a reason other than
    /// would-block.
    pub fn new(
        io: Box<dyn Io>,
        registry: Registry,
        packet_type: &'static str,
        recipient_name: impl Into<String>,
        on_disconnect: Box<dyn FnMut() + Send>,
    ) -> std::io::Result<Writer> {
        let handle = io.handle();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                io,
                backlog: VecDeque::new(),
                dropped_packets: 0,
            }),
            registry,
            token: Token(handle, SourceKind::Generic),
            recipient_name: recipient_name.into(),
            packet_type,
            on_disconnect: Mutex::new(Some(on_disconnect)),
        });

        let drain_shared = Arc::clone(&shared);
        shared.registry.add_source(
            handle,
            SourceKind::Generic,
            Interest::default(),
            None,
            Some(Box::new(move || Writer::drain(&drain_shared))),
        )?;

        Ok(Writer { shared })
    }

    /// A cloneable handle that can push packets from any thread.
    pub fn handle(&self) -> WriterHandle {
        WriterHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Total packets dropped from the backlog over this writer's lifetime.
    pub fn dropped_packets(&self) -> u64 {
        self.shared.state.lock().dropped_packets
    }

    /// Number of packets currently queued, waiting for `WRITABLE`.
    pub fn backlog_len(&self) -> usize {
        self.shared.state.lock().backlog.len()
    }

    /// Writes `packet`, queueing it if the destination isn't ready.
    ///
    /// Mirrors the source library's `writer_write`: a packet is attempted
    /// directly only when the backlog is already empty, so packets are
    /// never reordered ahead of ones still waiting to go out.
    pub fn write(&self, packet: &[u8]) -> Result<WriteOutcome> {
        Writer::write_shared(&self.shared, packet)
    }

    fn write_shared(shared: &Arc<Shared>, packet: &[u8]) -> Result<WriteOutcome> {
        let mut state = shared.state.lock();

        if !state.backlog.is_empty() {
            Writer::push_to_backlog(shared, &mut state, packet);
            return Ok(WriteOutcome::Queued);
        }

        match state.io.write(packet) {
            Ok(written) if written == packet.len() => Ok(WriteOutcome::Direct),
            Ok(written) => {
                // A short write is legitimate for this crate's Io contract
                // (unlike the original packet-oriented write, which only
                // ever wrote whole datagrams). Queue whatever didn't go out.
                Writer::push_to_backlog(shared, &mut state, &packet[written..]);
                Ok(WriteOutcome::Queued)
            }
            Err(RuntimeError::WouldBlock) => {
                Writer::push_to_backlog(shared, &mut state, packet);
                Ok(WriteOutcome::Queued)
            }
            Err(err) => {
                log_error!(
                    "could not send {} to {}, disconnecting: {}",
                    shared.packet_type,
                    shared.recipient_name,
                    err
                );
                drop(state);
                Writer::disconnect(shared);
                Err(err)
            }
        }
    }

    /// Appends `bytes` as a new backlog entry, dropping the oldest queued
    /// entries first if the backlog is already at capacity, and arms
    /// `WRITABLE` on the 0-to-1 transition.
    fn push_to_backlog(shared: &Arc<Shared>, state: &mut State, bytes: &[u8]) {
        if state.backlog.len() >= MAX_QUEUED_WRITES {
            let to_drop = state.backlog.len() - MAX_QUEUED_WRITES + 1;
            for _ in 0..to_drop {
                state.backlog.pop_front();
            }
            state.dropped_packets += to_drop as u64;
            log_warn!(
                "write backlog for {} is full, dropping {} queued {}(s), {} dropped in total",
                shared.recipient_name,
                to_drop,
                shared.packet_type,
                state.dropped_packets
            );
        }

        state.backlog.push_back(bytes.to_vec());

        if state.backlog.len() == 1 {
            // The write handler (Writer::drain) was installed once, at
            // construction; modify_source only edits the interest mask.
            if let Err(err) =
                shared
                    .registry
                    .modify_source(shared.token, Interest::default(), Interest::WRITABLE)
            {
                log_error!("could not arm write interest for {}: {}", shared.recipient_name, err);
            }
        }
    }

    /// The `WRITABLE` handler body: drains one queued packet per call, same
    /// as the source library's `writer_handle_write`, so a burst of
    /// readiness events doesn't starve other sources.
    fn drain(shared: &Arc<Shared>) {
        let mut state = shared.state.lock();

        let packet = match state.backlog.front() {
            Some(packet) => packet.clone(),
            None => return,
        };

        match state.io.write(&packet) {
            Ok(written) if written == packet.len() => {
                state.backlog.pop_front();
                log_debug!(
                    "sent queued {} to {}, {} left in write backlog",
                    shared.packet_type,
                    shared.recipient_name,
                    state.backlog.len()
                );

                if state.backlog.is_empty() {
                    let _ = shared.registry.modify_source(
                        shared.token,
                        Interest::WRITABLE,
                        Interest::default(),
                    );
                }
            }
            Ok(written) => {
                // Partial write: trim the front entry in place and try again
                // next time WRITABLE fires.
                state.backlog[0].drain(..written);
            }
            Err(RuntimeError::WouldBlock) => {}
            Err(err) => {
                log_error!(
                    "could not send queued {} to {}, disconnecting: {}",
                    shared.packet_type,
                    shared.recipient_name,
                    err
                );
                drop(state);
                Writer::disconnect(shared);
            }
        }
    }

    fn disconnect(shared: &Arc<Shared>) {
        if let Some(mut hook) = shared.on_disconnect.lock().take() {
            hook();
        }
    }
}

impl WriterHandle {
    pub fn write(&self, packet: &[u8]) -> Result<WriteOutcome> {
        Writer::write_shared(&self.shared, packet)
    }

    pub fn dropped_packets(&self) -> u64 {
        self.shared.state.lock().dropped_packets
    }
}

impl Drop for Writer {
    /// Warns (matching `writer_destroy`) if packets are still queued, and
    /// disarms `WRITABLE` so a stale handler never fires against a dropped
    /// `Io`.
    fn drop(&mut self) {
        let backlog_len = self.shared.state.lock().backlog.len();
        if backlog_len > 0 {
            log_warn!(
                "destroying writer for {} while {} {}(s) have not been sent",
                self.shared.recipient_name,
                backlog_len,
                self.shared.packet_type
            );
            let _ = self
                .shared
                .registry
                .modify_source(self.shared.token, Interest::WRITABLE, Interest::default());
        }
        let _ = self.shared.registry.remove_source(self.shared.token);
    }
}
