//! Crate-wide error kinds.
//!
//! Most public functions in this crate return plain [`std::io::Result`], the
//! same convention the event-loop layer uses throughout. [`RuntimeError`]
//! exists for the handful of call sites that need to distinguish kinds
//! `io::ErrorKind` cannot express on stable Rust (`TooLarge`,
//! `ResourceExhausted` vs. out-of-memory, `NotSupported`), and converts back
//! into `io::Error` at the boundary so callers never have to match on two
//! error types.

use std::io;

/// One of the error kinds named by the runtime's error model.
///
/// `Interrupted` is deliberately absent: every blocking wrapper in this crate
/// retries on interruption internally and never surfaces it.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("no such entity")]
    NoSuchEntity,

    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("operation would block")]
    WouldBlock,

    #[error("broken pipe")]
    BrokenPipe,

    #[error("already exists")]
    AlreadyExists,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[source] io::Error),

    #[error("value too large")]
    TooLarge,

    #[error("not supported: {0}")]
    NotSupported(String),
}

impl RuntimeError {
    /// Wraps a raw OS error, preserving `WouldBlock`/`Interrupted` distinctions.
    pub fn from_io(err: io::Error) -> RuntimeError {
        match err.kind() {
            io::ErrorKind::WouldBlock => RuntimeError::WouldBlock,
            io::ErrorKind::BrokenPipe => RuntimeError::BrokenPipe,
            io::ErrorKind::AlreadyExists => RuntimeError::AlreadyExists,
            io::ErrorKind::PermissionDenied => RuntimeError::PermissionDenied,
            io::ErrorKind::NotFound => RuntimeError::NoSuchEntity,
            _ => RuntimeError::IoFailure(err),
        }
    }
}

impl From<io::Error> for RuntimeError {
    fn from(err: io::Error) -> RuntimeError {
        RuntimeError::from_io(err)
    }
}

impl From<RuntimeError> for io::Error {
    fn from(err: RuntimeError) -> io::Error {
        match err {
            RuntimeError::NoSuchEntity => io::Error::new(io::ErrorKind::NotFound, err),
            RuntimeError::PermissionDenied => io::Error::new(io::ErrorKind::PermissionDenied, err),
            RuntimeError::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            RuntimeError::OutOfMemory => io::Error::new(io::ErrorKind::OutOfMemory, err),
            RuntimeError::WouldBlock => io::Error::new(io::ErrorKind::WouldBlock, err),
            RuntimeError::BrokenPipe => io::Error::new(io::ErrorKind::BrokenPipe, err),
            RuntimeError::AlreadyExists => io::Error::new(io::ErrorKind::AlreadyExists, err),
            RuntimeError::ResourceExhausted(_) => io::Error::new(io::ErrorKind::Other, err),
            RuntimeError::IoFailure(inner) => inner,
            RuntimeError::TooLarge => io::Error::new(io::ErrorKind::InvalidInput, err),
            RuntimeError::NotSupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
