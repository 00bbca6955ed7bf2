//! Platform-specific glue for the event loop's readiness backend.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub(crate) use unix::{Events, Selector};
