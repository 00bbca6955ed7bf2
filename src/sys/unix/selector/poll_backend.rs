//! Raw `poll(2)`-backed selector for Unix targets without epoll.
//!
//! Unlike epoll, `poll(2)` has no kernel-side persistent interest set: the
//! full set of watched fds is rebuilt into a `pollfd` array on every call.
//! This maps directly onto the dispatch algorithm's own "resize the
//! per-iteration readiness array to the current source count, copy
//! (handle, interest) from every live source" step, so `register`/
//! `reregister`/`deregister` here just maintain the map this backend
//! rebuilds the array from.

use crate::event::Interest;
use crate::sys::unix::syscall;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct Selector {
    watched: crate::sync::Mutex<HashMap<RawFd, (u64, Interest)>>,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        Ok(Selector {
            watched: crate::sync::Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.watched.lock().insert(fd, (token, interest));
        Ok(())
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.watched.lock().insert(fd, (token, interest));
        Ok(())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.watched.lock().remove(&fd);
        Ok(())
    }

    pub(crate) fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let watched = self.watched.lock();
        events.tokens.clear();
        events.pollfds.clear();
        for (&fd, &(token, interest)) in watched.iter() {
            let mut poll_events = 0;
            if interest.is_readable() {
                poll_events |= libc::POLLIN;
            }
            if interest.is_writable() {
                poll_events |= libc::POLLOUT;
            }
            events.tokens.push(token);
            events.pollfds.push(libc::pollfd {
                fd,
                events: poll_events as libc::c_short,
                revents: 0,
            });
        }
        drop(watched);

        let timeout_ms = timeout
            .map(|to| to.as_millis().min(libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        loop {
            match syscall!(poll(
                events.pollfds.as_mut_ptr(),
                events.pollfds.len() as libc::nfds_t,
                timeout_ms,
            )) {
                Ok(_) => return Ok(()),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

pub(crate) type Event = libc::pollfd;

#[derive(Debug, Default)]
pub(crate) struct Events {
    pollfds: Vec<Event>,
    tokens: Vec<u64>,
}

impl Events {
    pub(crate) fn with_capacity(capacity: usize) -> Events {
        Events {
            pollfds: Vec::with_capacity(capacity),
            tokens: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn resize(&mut self, capacity: usize) {
        if self.pollfds.capacity() < capacity {
            self.pollfds.reserve(capacity - self.pollfds.capacity());
            self.tokens.reserve(capacity - self.tokens.capacity());
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, bool, bool)> + '_ {
        self.pollfds
            .iter()
            .zip(self.tokens.iter())
            .filter(|(pfd, _)| pfd.revents != 0)
            .map(|(pfd, &token)| {
                let revents = pfd.revents as libc::c_int;
                (
                    token,
                    revents & (libc::POLLIN | libc::POLLPRI) != 0,
                    revents & libc::POLLOUT != 0,
                )
            })
    }
}
