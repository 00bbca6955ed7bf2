//! epoll-backed selector for Linux/Android.

use crate::event::Interest;
use crate::sys::unix::syscall;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        // SAFETY: epoll_create1 returns a valid owned fd or -1.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector { ep })
    }

    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: token,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: token,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            std::ptr::null_mut()
        ))
        .map(|_| ())
    }

    /// Blocks until at least one registered fd is ready or `timeout` elapses.
    /// Retries transparently on `EINTR` — callers never observe `Interrupted`.
    pub(crate) fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|to| to.as_millis().min(libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        events.0.clear();
        loop {
            match syscall!(epoll_wait(
                self.ep.as_raw_fd(),
                events.0.as_mut_ptr(),
                events.0.capacity() as i32,
                timeout_ms,
            )) {
                Ok(n) => {
                    // SAFETY: epoll_wait guarantees the first `n` entries are
                    // initialized.
                    unsafe { events.0.set_len(n as usize) };
                    return Ok(());
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    let mut kind = 0;
    if interest.is_readable() {
        kind |= libc::EPOLLIN | libc::EPOLLRDHUP;
    }
    if interest.is_writable() {
        kind |= libc::EPOLLOUT;
    }
    kind as u32
}

pub(crate) type Event = libc::epoll_event;

#[derive(Debug)]
pub(crate) struct Events(Vec<Event>);

impl Events {
    pub(crate) fn with_capacity(capacity: usize) -> Events {
        Events(Vec::with_capacity(capacity))
    }

    pub(crate) fn resize(&mut self, capacity: usize) {
        if self.0.capacity() < capacity {
            self.0.reserve(capacity - self.0.capacity());
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, bool, bool)> + '_ {
        self.0.iter().map(|ev| {
            let flags = ev.events as libc::c_int;
            (
                ev.u64,
                flags & (libc::EPOLLIN | libc::EPOLLPRI) != 0,
                flags & libc::EPOLLOUT != 0,
            )
        })
    }
}
