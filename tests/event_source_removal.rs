//! End-to-end scenario: removing one source from within another source's
//! handler, mid-dispatch-batch, doesn't disturb the batch the loop is
//! currently iterating — removal only takes effect at the next
//! `cleanup_sources`, run once per batch after every handler in it fires.

use daemon_runtime::event::{EventLoop, Interest, SourceKind};
use daemon_runtime::sync::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn raw_pipe() -> (std::os::unix::io::RawFd, std::os::unix::io::RawFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

#[test]
fn source_removed_from_within_a_handler_still_fires_for_the_rest_of_the_batch() {
    let mut event_loop = EventLoop::new().unwrap();
    let (r1, w1) = raw_pipe();
    let (r2, w2) = raw_pipe();

    let second_fired = Arc::new(Mutex::new(false));
    let second_fired_clone = Arc::clone(&second_fired);
    let registry = event_loop.registry();

    event_loop
        .add_source(
            r1,
            SourceKind::Generic,
            Interest::READABLE,
            Some(Box::new(move || {
                registry
                    .remove_source(daemon_runtime::event::Token(r1, SourceKind::Generic))
                    .unwrap();
            })),
            None,
        )
        .unwrap();
    event_loop
        .add_source(
            r2,
            SourceKind::Generic,
            Interest::READABLE,
            Some(Box::new(move || {
                *second_fired_clone.lock() = true;
            })),
            None,
        )
        .unwrap();

    unsafe {
        libc::write(w1, b"x".as_ptr() as *const _, 1);
        libc::write(w2, b"x".as_ptr() as *const _, 1);
    }

    let stop_handle = event_loop.stop_handle();
    event_loop
        .run(|_| {
            stop_handle.store(true, Ordering::Release);
        })
        .unwrap();

    assert!(*second_fired.lock());

    // `r1`'s slot was only freed at `cleanup_sources`, run once after every
    // handler in the batch fired; re-registering the same fd now succeeds,
    // which it would not if the slot were still considered live.
    assert!(event_loop
        .add_source(r1, SourceKind::Generic, Interest::READABLE, None, None)
        .is_ok());

    unsafe {
        libc::close(r1);
        libc::close(w1);
        libc::close(r2);
        libc::close(w2);
    }
}
