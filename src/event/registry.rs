//! The shared, cloneable handle that owns the source table and the platform
//! selector.
//!
//! Mirrors the source library's `Poll`/`Registry` split: [`EventLoop`]
//! drives the blocking wait on one thread, but anything holding a
//! [`Registry`] clone — most importantly [`Writer`](crate::writer::Writer)
//! — can add, modify, or remove a source from any thread without touching
//! the loop itself. The split exists because a dispatch handler (running on
//! the loop thread, invoked *by* the loop) routinely needs to call
//! `modify_source` on its own source — e.g. the writer arming `WRITABLE`
//! after queuing a packet — and that must not require re-entering the loop's
//! own `&mut self`.

use super::source::{EventSource, Handler, SourceKind, SourceState};
use super::{Interest, Token};
use crate::sync::Mutex;
use crate::sys::{Events, Selector};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct SourceTable {
    sources: Vec<Option<EventSource>>,
    index_of: HashMap<Token, usize>,
    free_slots: Vec<usize>,
}

/// Platform hook for `SourceKind::Extension` sources — handles the
/// multiplexer backend doesn't know how to poll (the source library's
/// motivating case is a libusb hot-plug notification handle). Invoked once
/// per dispatch batch, before the blocking wait, with the handles of every
/// currently-registered, non-removed extension source; returns the subset
/// that is ready.
///
/// No concrete platform integration ships with this crate — this is only
/// the hook point one would plug into.
pub type ExtensionHook = Box<dyn FnMut(&[RawFd]) -> Vec<RawFd> + Send>;

struct Inner {
    selector: Selector,
    table: Mutex<SourceTable>,
    extension_hook: Mutex<Option<ExtensionHook>>,
}

/// A cheaply cloneable handle onto the event loop's source table and
/// platform selector.
///
/// Registration methods take only the table's mutex for the duration of the
/// bookkeeping mutation; they never hold it across a handler invocation, so
/// a handler is free to call back into `modify_source`/`remove_source` on
/// its own source (see [`EventLoop`]'s dispatch algorithm).
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub(super) fn new() -> io::Result<Registry> {
        Ok(Registry {
            inner: Arc::new(Inner {
                selector: Selector::new()?,
                table: Mutex::new(SourceTable::default()),
                extension_hook: Mutex::new(None),
            }),
        })
    }

    /// Adds (or re-adds) a source. A duplicate `(handle, kind)` that is
    /// currently `Normal`/`Added` is an error; one that is `Removed` is
    /// restored and transitions to `Readded`.
    pub fn add_source(
        &self,
        handle: RawFd,
        kind: SourceKind,
        interest: Interest,
        on_read: Option<Handler>,
        on_write: Option<Handler>,
    ) -> io::Result<Token> {
        let token = Token(handle, kind);
        let mut table = self.inner.table.lock();

        if let Some(&index) = table.index_of.get(&token) {
            let source = table.sources[index]
                .as_mut()
                .expect("index_of points at a live slot");
            return match source.state {
                SourceState::Removed => {
                    source.state = SourceState::Readded;
                    source.interest = interest;
                    source.on_read = on_read;
                    source.on_write = on_write;
                    if kind != SourceKind::Extension {
                        self.inner.selector.reregister(handle, index as u64, interest)?;
                    }
                    Ok(token)
                }
                _ => Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "source already registered",
                )),
            };
        }

        let index = match table.free_slots.pop() {
            Some(index) => index,
            None => {
                table.sources.push(None);
                table.sources.len() - 1
            }
        };

        if kind != SourceKind::Extension {
            self.inner.selector.register(handle, index as u64, interest)?;
        }
        table.sources[index] = Some(EventSource {
            handle,
            kind,
            interest,
            state: SourceState::Added,
            on_read,
            on_write,
        });
        table.index_of.insert(token, index);

        Ok(token)
    }

    /// Edits the interest mask of an existing source (used by the writer to
    /// arm/disarm `WRITABLE`). `remove_mask` bits are cleared before
    /// `add_mask` bits are set.
    pub fn modify_source(&self, token: Token, remove_mask: Interest, add_mask: Interest) -> io::Result<()> {
        let mut table = self.inner.table.lock();
        let index = *table
            .index_of
            .get(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such source"))?;
        let source = table.sources[index]
            .as_mut()
            .expect("index_of points at a live slot");

        let bits = (source.interest.bits() & !remove_mask.bits()) | add_mask.bits();
        source.interest = Interest::from_bits(bits);
        if source.state == SourceState::Normal {
            source.state = SourceState::Modified;
        }

        if source.kind == SourceKind::Extension {
            return Ok(());
        }
        self.inner.selector.reregister(source.handle, index as u64, source.interest)
    }

    /// Marks a source `Removed`. Does not unregister it from the platform
    /// backend or free its slot — that only happens in
    /// [`cleanup_sources`](Self::cleanup_sources), so the slot stays
    /// addressable until the current dispatch batch finishes.
    pub fn remove_source(&self, token: Token) -> io::Result<()> {
        let mut table = self.inner.table.lock();
        let index = *table
            .index_of
            .get(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such source"))?;
        table.sources[index]
            .as_mut()
            .expect("index_of points at a live slot")
            .state = SourceState::Removed;
        Ok(())
    }

    /// Replaces the read or write handler of an existing source. Used by
    /// [`Writer`](crate::writer::Writer) to install its drain callback the
    /// first time it arms `WRITABLE`, alongside
    /// [`modify_source`](Self::modify_source).
    pub fn set_handler(&self, token: Token, read: bool, handler: Option<Handler>) -> io::Result<()> {
        let mut table = self.inner.table.lock();
        let index = *table
            .index_of
            .get(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such source"))?;
        let source = table.sources[index]
            .as_mut()
            .expect("index_of points at a live slot");
        if read {
            source.on_read = handler;
        } else {
            source.on_write = handler;
        }
        Ok(())
    }

    /// The only place a `Removed` source is actually unregistered and
    /// freed; `Added`/`Readded`/`Modified` sources commit to `Normal`.
    pub(super) fn cleanup_sources(&self) {
        let mut table = self.inner.table.lock();
        for index in 0..table.sources.len() {
            let should_free = match &table.sources[index] {
                Some(source) => match source.state {
                    SourceState::Removed => true,
                    SourceState::Added | SourceState::Readded | SourceState::Modified => {
                        table.sources[index].as_mut().unwrap().state = SourceState::Normal;
                        false
                    }
                    SourceState::Normal => false,
                },
                None => false,
            };
            if should_free {
                let source = table.sources[index].take().unwrap();
                if source.kind != SourceKind::Extension {
                    let _ = self.inner.selector.deregister(source.handle);
                }
                table.index_of.remove(&Token(source.handle, source.kind));
                table.free_slots.push(index);
            }
        }
    }

    pub(super) fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.selector.select(events, timeout)
    }

    /// Installs (replacing any previous one) the platform hook polled once
    /// per dispatch batch for `Extension` sources, before the blocking
    /// wait. See [`ExtensionHook`].
    pub fn set_extension_hook(&self, hook: ExtensionHook) {
        *self.inner.extension_hook.lock() = Some(hook);
    }

    /// Calls the extension hook, if one is installed and at least one
    /// `Extension` source is currently registered, and maps the handles it
    /// reports ready back to their slot indices.
    pub(super) fn poll_extension_sources(&self) -> Vec<usize> {
        let mut hook_slot = self.inner.extension_hook.lock();
        let hook = match hook_slot.as_mut() {
            Some(hook) => hook,
            None => return Vec::new(),
        };

        let handles: Vec<RawFd> = {
            let table = self.inner.table.lock();
            table
                .sources
                .iter()
                .filter_map(|slot| slot.as_ref())
                .filter(|source| source.kind == SourceKind::Extension && source.state != SourceState::Removed)
                .map(|source| source.handle)
                .collect()
        };
        if handles.is_empty() {
            return Vec::new();
        }

        let ready_handles = hook(&handles);
        if ready_handles.is_empty() {
            return Vec::new();
        }

        let table = self.inner.table.lock();
        ready_handles
            .into_iter()
            .filter_map(|handle| table.index_of.get(&Token(handle, SourceKind::Extension)).copied())
            .collect()
    }

    pub(super) fn is_removed_or_absent(&self, index: usize) -> bool {
        let table = self.inner.table.lock();
        match &table.sources[index] {
            Some(source) => source.state == SourceState::Removed,
            None => true,
        }
    }

    /// Temporarily removes the read or write handler from `index` so it can
    /// be invoked without the table's mutex held, then restored with
    /// [`put_handler`](Self::put_handler). A handler running with the mutex
    /// released is free to call `add_source`/`modify_source`/`remove_source`
    /// on any source, including its own, without deadlocking.
    pub(super) fn take_handler(&self, index: usize, read: bool) -> Option<Handler> {
        let mut table = self.inner.table.lock();
        match &mut table.sources[index] {
            Some(source) if read => source.on_read.take(),
            Some(source) => source.on_write.take(),
            None => None,
        }
    }

    pub(super) fn put_handler(&self, index: usize, read: bool, handler: Handler) {
        let mut table = self.inner.table.lock();
        if let Some(source) = &mut table.sources[index] {
            if read {
                source.on_read = Some(handler);
            } else {
                source.on_write = Some(handler);
            }
        }
    }

    pub(super) fn still_live(&self, index: usize) -> bool {
        let table = self.inner.table.lock();
        matches!(&table.sources[index], Some(source) if source.state != SourceState::Removed)
    }

    pub(super) fn len(&self) -> usize {
        self.inner.table.lock().sources.len()
    }

    #[cfg(test)]
    pub(crate) fn source_state(&self, token: Token) -> Option<SourceState> {
        let table = self.inner.table.lock();
        table
            .index_of
            .get(&token)
            .and_then(|&index| table.sources[index].as_ref())
            .map(|source| source.state)
    }
}
