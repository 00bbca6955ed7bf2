//! Readiness multiplexing: the event loop, its sources, and the signal bridge.
//!
//! See [`EventLoop`] for the dispatch algorithm and the add/modify/remove
//! safety contract during iteration.

mod dispatch;
mod registry;
mod signal;
mod source;

pub use dispatch::EventLoop;
pub use registry::{ExtensionHook, Registry};
pub use signal::SignalBridge;
pub use source::{Handler, SourceKind, SourceState};

use std::os::unix::io::RawFd;

/// Opaque identifier handed back to the caller on [`EventLoop::add_source`],
/// used for subsequent `modify_source`/`remove_source` calls.
///
/// Identity is `(handle, kind)`, exactly as in the source library: two
/// sources are the same registration iff they share both fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token(pub RawFd, pub SourceKind);

bitflags_like! {
    /// Readiness interest bits. Only readable/writable are meaningful to this
    /// runtime; there is no priority/AIO/LIO support, unlike a general-purpose
    /// networking reactor.
    pub struct Interest: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

impl Interest {
    pub const fn is_readable(self) -> bool {
        self.contains(Interest::READABLE)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(Interest::WRITABLE)
    }

    pub(crate) const fn from_bits(bits: u8) -> Interest {
        Interest(bits)
    }
}
