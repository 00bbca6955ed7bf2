//! Runtime foundation for long-running, message-oriented daemons.
//!
//! This crate supplies the mechanisms a daemon process needs, not the
//! protocol it speaks: a readiness-multiplexing [`event`] loop, a
//! polymorphic [`io`] read/write/close surface over files, pipes and stream
//! sockets, a back-pressure-aware [`writer`], an asynchronous [`log`]ger
//! with per-source debug filters and size-triggered rotation, the
//! [`sync`] primitives those subsystems share, a `key = value` [`config`]
//! loader, and (on Unix, behind `os-ext`) [`daemon`]ization and
//! [`pidfile`] helpers.
//!
//! For documentation of features see the [`features`] module.

#![allow(dead_code)]

#[macro_use]
mod macros;

pub mod error;

cfg_os_poll! {
    pub mod event;
    pub mod io;
    pub mod writer;
    pub mod log;
    mod sys;
}

pub mod config;
pub mod fifo;
pub mod sync;

cfg_os_ext! {
    pub mod daemon;
    pub mod pidfile;
}

pub use error::{Result, RuntimeError};

/// Documents this crate's Cargo features; contains no code.
///
/// - `os-poll` (default): the [`EventLoop`](event::EventLoop)/[`Registry`](event::Registry)
///   readiness backends (epoll on Linux/Android, raw `poll(2)` elsewhere),
///   the [`io`] abstraction, the [`writer`], and the [`log`] module (its
///   output sinks are built on [`io::File`]/[`io::Stderr`]).
/// - `os-ext` (implies `os-poll`, Unix only): the double-fork [`daemon`]izer
///   and the [`pidfile`] helper — these only make sense on Unix and are
///   gated separately so a library consumer embedding the event loop in a
///   non-daemon process doesn't pull them in.
/// - `log` (default): routes this crate's own internal diagnostics through
///   the `log` facade's `trace!`/`debug!`/`warn!`/`error!` macros. Unrelated
///   to [`log::Logger`], which is the asynchronous logger this crate hands
///   to its own callers.
pub mod features {}
