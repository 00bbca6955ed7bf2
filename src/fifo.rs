//! Thread-safe byte ring buffer with blocking/non-blocking modes.
//!
//! One slot of the backing buffer is always kept empty so that `begin ==
//! end` is unambiguously "empty" rather than ambiguous with "full".

use crate::error::{Result, RuntimeError};
use crate::sync::{Condition, Mutex};

bitflags_like! {
    /// Flags accepted by [`Fifo::write`] / [`Fifo::read`].
    pub struct FifoFlags: u32 {
        const NONE = 0;
        const NON_BLOCKING = 0x0001;
    }
}

struct State {
    buffer: Vec<u8>,
    begin: usize, // inclusive
    end: usize,   // exclusive
    shutdown: bool,
}

impl State {
    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn writable_at_all(&self) -> usize {
        if self.begin <= self.end {
            self.len() - (self.end - self.begin) - 1
        } else {
            self.begin - self.end - 1
        }
    }

    fn writable_at_once(&self) -> usize {
        if self.begin <= self.end {
            if self.begin == 0 {
                self.len() - self.end - 1
            } else {
                self.len() - self.end
            }
        } else {
            self.begin - self.end - 1
        }
    }

    fn readable_at_all(&self) -> usize {
        if self.begin <= self.end {
            self.end - self.begin
        } else {
            self.len() - (self.begin - self.end)
        }
    }

    fn readable_at_once(&self) -> usize {
        if self.begin <= self.end {
            self.end - self.begin
        } else {
            self.len() - self.begin
        }
    }
}

/// A fixed-capacity thread-safe ring buffer of bytes.
///
/// Usable capacity is `length - 1`: one slot is reserved so empty and full
/// are always distinguishable from `(begin, end)` alone.
pub struct Fifo {
    state: Mutex<State>,
    writable: Condition,
    readable: Condition,
}

impl Fifo {
    /// Creates a FIFO backed by a buffer of `length` bytes (usable capacity
    /// `length - 1`).
    pub fn new(length: usize) -> Self {
        assert!(length >= 2, "FIFO needs at least 2 bytes of backing storage");
        Fifo {
            state: Mutex::new(State {
                buffer: vec![0u8; length],
                begin: 0,
                end: 0,
                shutdown: false,
            }),
            writable: Condition::new(),
            readable: Condition::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().len() - 1
    }

    /// Writes `buf` in full or fails; never short-writes.
    ///
    /// Blocking mode waits on the writable condition until enough space is
    /// free. Non-blocking mode fails immediately with [`RuntimeError::TooLarge`]
    /// if `buf` can never fit, or [`RuntimeError::WouldBlock`] if there is
    /// momentarily not enough room.
    pub fn write(&self, buf: &[u8], flags: FifoFlags) -> Result<usize> {
        let blocking = !flags.contains(FifoFlags::NON_BLOCKING);
        let mut state = self.state.lock();

        if state.shutdown {
            return Err(RuntimeError::BrokenPipe);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if !blocking {
            if buf.len() > state.len() - 1 {
                return Err(RuntimeError::TooLarge);
            }
            if buf.len() > state.writable_at_all() {
                return Err(RuntimeError::WouldBlock);
            }
        }

        let mut written = 0;
        while written < buf.len() {
            if blocking {
                while state.writable_at_all() == 0 {
                    state = self.writable.wait(state);
                    if state.shutdown {
                        return Err(RuntimeError::BrokenPipe);
                    }
                }
            }

            let mut chunk = state.writable_at_once();
            if chunk > buf.len() - written {
                chunk = buf.len() - written;
            }

            let end = state.end;
            let len = state.len();
            state.buffer[end..end + chunk].copy_from_slice(&buf[written..written + chunk]);
            state.end = (end + chunk) % len;
            written += chunk;

            self.readable.broadcast();
        }

        Ok(written)
    }

    /// Reads up to `buf.len()` bytes, possibly short-reading.
    ///
    /// Returns `Ok(0)` iff the FIFO is empty and shut down. Blocking mode
    /// waits only until *some* bytes are available, not until `buf` is full.
    pub fn read(&self, buf: &mut [u8], flags: FifoFlags) -> Result<usize> {
        let blocking = !flags.contains(FifoFlags::NON_BLOCKING);
        let mut state = self.state.lock();

        if buf.is_empty() {
            return Ok(0);
        }

        if state.readable_at_all() == 0 {
            if state.shutdown {
                return Ok(0);
            }
            if !blocking {
                return Err(RuntimeError::WouldBlock);
            }
        }

        if blocking {
            while state.readable_at_all() == 0 {
                state = self.readable.wait(state);
                if state.shutdown {
                    break;
                }
            }
        }

        let mut read = 0;
        while state.readable_at_all() > 0 && read < buf.len() {
            let mut chunk = state.readable_at_once();
            if chunk > buf.len() - read {
                chunk = buf.len() - read;
            }

            let begin = state.begin;
            let len = state.len();
            buf[read..read + chunk].copy_from_slice(&state.buffer[begin..begin + chunk]);
            state.begin = (begin + chunk) % len;
            read += chunk;

            self.writable.broadcast();
        }

        Ok(read)
    }

    /// Shuts the FIFO down. Idempotent; wakes every blocked reader and writer.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.writable.broadcast();
        self.readable.broadcast();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Thread;
    use std::sync::Arc;

    #[test]
    fn round_trip_blocking() {
        let fifo = Fifo::new(64);
        let data = b"hello daemon runtime";
        assert_eq!(fifo.write(data, FifoFlags::NONE).unwrap(), data.len());
        let mut out = vec![0u8; data.len()];
        assert_eq!(fifo.read(&mut out, FifoFlags::NONE).unwrap(), data.len());
        assert_eq!(&out, data);
    }

    #[test]
    fn non_blocking_write_too_large() {
        let fifo = Fifo::new(8); // usable capacity 7
        let data = [0u8; 8];
        let err = fifo.write(&data, FifoFlags::NON_BLOCKING).unwrap_err();
        assert!(matches!(err, RuntimeError::TooLarge));
    }

    #[test]
    fn non_blocking_write_would_block_when_full() {
        let fifo = Fifo::new(8);
        fifo.write(&[0u8; 7], FifoFlags::NONE).unwrap();
        let err = fifo.write(&[1u8], FifoFlags::NON_BLOCKING).unwrap_err();
        assert!(matches!(err, RuntimeError::WouldBlock));
    }

    #[test]
    fn non_blocking_read_would_block_when_empty() {
        let fifo = Fifo::new(8);
        let mut buf = [0u8; 4];
        let err = fifo.read(&mut buf, FifoFlags::NON_BLOCKING).unwrap_err();
        assert!(matches!(err, RuntimeError::WouldBlock));
    }

    #[test]
    fn shutdown_unblocks_blocked_reader() {
        let fifo = Arc::new(Fifo::new(8));
        let reader_fifo = Arc::clone(&fifo);
        let reader = Thread::spawn("fifo-reader", move || {
            let mut buf = [0u8; 4];
            assert_eq!(reader_fifo.read(&mut buf, FifoFlags::NONE).unwrap(), 0);
        });
        fifo.shutdown();
        reader.join();
    }

    #[test]
    fn write_after_shutdown_is_broken_pipe() {
        let fifo = Fifo::new(8);
        fifo.shutdown();
        let err = fifo.write(b"x", FifoFlags::NONE).unwrap_err();
        assert!(matches!(err, RuntimeError::BrokenPipe));
    }

    #[test]
    fn wrap_around_round_trip() {
        let fifo = Fifo::new(8); // capacity 7
        fifo.write(b"abcde", FifoFlags::NONE).unwrap();
        let mut out = [0u8; 3];
        fifo.read(&mut out, FifoFlags::NONE).unwrap();
        assert_eq!(&out, b"abc");
        fifo.write(b"fgh", FifoFlags::NONE).unwrap(); // wraps past buffer end
        let mut rest = [0u8; 5];
        assert_eq!(fifo.read(&mut rest, FifoFlags::NONE).unwrap(), 5);
        assert_eq!(&rest, b"defgh");
    }
}
