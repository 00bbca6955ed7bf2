//! [`EventSource`] and the state machine that makes add/remove/modify safe
//! to call from inside a dispatch handler.

use super::Interest;
use std::os::unix::io::RawFd;

/// Distinguishes a plain pollable handle, registered with the platform
/// selector like any other source, from one contributed by a platform
/// extension hook (the source library's "usb" case, generalized: this crate
/// has no USB/libusb implementation of its own, only the hook point an
/// integration could use to add one).
///
/// An `Extension` source is never handed to the selector backend —
/// [`Registry::set_extension_hook`](super::Registry::set_extension_hook)
/// installs a callback the event loop calls once per dispatch batch,
/// before the blocking wait, to learn which registered `Extension` handles
/// are ready; those are dispatched (read side only) alongside whatever the
/// selector itself reports ready.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Generic,
    Extension,
}

/// Lifecycle state of a registered source.
///
/// Exists solely to make `add_source`/`modify_source`/`remove_source` safe
/// to call from within a dispatch handler without invalidating the index
/// alignment the current batch depends on (see [`EventLoop`]'s dispatch
/// algorithm).
///
/// [`EventLoop`]: super::EventLoop
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceState {
    /// Present before this batch started, still live.
    Normal,
    /// Added this batch; committed to `Normal` at the next cleanup.
    Added,
    /// Marked for removal; not yet unregistered or freed.
    Removed,
    /// Was `Removed`, re-added before cleanup could run; restored to `Normal`.
    Readded,
    /// Interest mask changed; committed to `Normal` at the next cleanup.
    Modified,
}

/// A boxed callback invoked with the source's opaque captured state.
///
/// Replaces the source library's `void *opaque` + raw function pointer pair
/// with an ordinary closure — callers capture whatever they need instead of
/// threading an opaque pointer through the loop.
pub type Handler = Box<dyn FnMut() + Send>;

/// A single registered handle plus its read/write callbacks.
///
/// The two-handler shape (separate read and write callbacks) is preserved
/// deliberately: [`Writer`](crate::writer::Writer) arms/disarms the write
/// interest independently of whatever is watching for readability.
pub struct EventSource {
    pub(super) handle: RawFd,
    pub(super) kind: SourceKind,
    pub(super) interest: Interest,
    pub(super) state: SourceState,
    pub(super) on_read: Option<Handler>,
    pub(super) on_write: Option<Handler>,
}

impl EventSource {
    pub fn handle(&self) -> RawFd {
        self.handle
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn state(&self) -> SourceState {
        self.state
    }
}
