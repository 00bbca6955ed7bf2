//! End-to-end scenario 1: a process-level signal stops the event loop.
//!
//! This is the same path `event::dispatch`'s own
//! `real_signals_invoke_hook_and_stop_the_loop` unit test drives, repeated
//! here as a standalone integration test so it also documents the scenario
//! at the level spec'd end-to-end behaviors, not just unit coverage.

use daemon_runtime::event::EventLoop;
use std::sync::atomic::Ordering;
use std::sync::Once;
use std::time::{Duration, Instant};

fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

#[test]
fn sigterm_stops_the_loop_promptly() {
    init_test_logging();
    let mut event_loop = EventLoop::new().unwrap();
    event_loop.init(None).unwrap();
    let stop_handle = event_loop.stop_handle();

    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        unsafe {
            libc::raise(libc::SIGTERM);
        }
    });

    let started = Instant::now();
    event_loop.run(|_| {}).unwrap();
    thread.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!stop_handle.load(Ordering::Acquire));
}
