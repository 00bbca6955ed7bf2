//! Thread and locking primitives with abort-on-error semantics.
//!
//! Every operation here either succeeds or aborts the process. There are no
//! recoverable error paths because these primitives sit on the forwarder and
//! writer-backlog paths, which have nothing sensible to do with a lock or
//! thread failure other than give up entirely. A poisoned `std::sync::Mutex`
//! (a panic while the lock was held) is treated the same as a failed
//! `pthread_mutex_lock`: it indicates the protected state can no longer be
//! trusted, so this layer aborts rather than propagating the poison error.

use std::sync::{self, Condvar, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

/// A mutex that aborts the process instead of returning a lock error.
///
/// Wraps `std::sync::Mutex` and converts poisoning into `abort()`, mirroring
/// the `pthread_mutex_lock(...) != 0 -> abort()` contract this type is
/// modeled on.
#[derive(Debug, Default)]
pub struct Mutex<T>(sync::Mutex<T>);

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Mutex(sync::Mutex::new(value))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(|_| std::process::abort())
    }
}

/// A condition variable always paired with an externally owned [`Mutex`].
///
/// Only indefinite wait and broadcast are exposed — no timed wait, no
/// signal-one — matching the narrower contract the runtime's producers and
/// consumers actually rely on.
#[derive(Debug, Default)]
pub struct Condition(Condvar);

impl Condition {
    pub fn new() -> Self {
        Condition(Condvar::new())
    }

    /// Waits on `guard`, returning the guard re-acquired after a wakeup.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.0.wait(guard).unwrap_or_else(|_| std::process::abort())
    }

    pub fn broadcast(&self) {
        self.0.notify_all();
    }
}

/// A counting semaphore with only acquire/release, aborting on OS failure.
///
/// Modeled on `threads_posix.c`'s `sem_wait`/`sem_post` wrapper; on stable
/// Rust there is no portable OS semaphore primitive, so this is implemented
/// in terms of [`Mutex`]/[`Condition`] rather than a raw `sem_t`, while
/// preserving the same abort-on-error contract (a poisoned internal mutex
/// aborts just as a failed `sem_wait` would).
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<u64>,
    available: Condition,
}

impl Semaphore {
    pub fn new(initial: u64) -> Self {
        Semaphore {
            count: Mutex::new(initial),
            available: Condition::new(),
        }
    }

    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            count = self.available.wait(count);
        }
        *count -= 1;
    }

    pub fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.available.broadcast();
    }
}

/// A joinable thread whose join aborts if called from the thread itself.
#[derive(Debug)]
pub struct Thread {
    handle: Option<JoinHandle<()>>,
    id: ThreadId,
}

impl Thread {
    /// Spawns `function` on a new OS thread, aborting the process if the
    /// underlying `std::thread::Builder::spawn` call fails (matching
    /// `pthread_create(...) != 0 -> abort()`).
    pub fn spawn<F>(name: &str, function: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(function)
            .unwrap_or_else(|_| std::process::abort());
        let id = handle.thread().id();
        Thread {
            handle: Some(handle),
            id,
        }
    }

    /// Blocks until the thread terminates.
    ///
    /// Aborts if called from the very thread being joined, and aborts if the
    /// joined thread panicked — both mirror `thread_join`'s contract in the
    /// source library.
    pub fn join(mut self) {
        if thread::current().id() == self.id {
            std::process::abort();
        }
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_else(|_| std::process::abort());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mutex_protects_shared_state() {
        let mutex = Arc::new(Mutex::new(0_u64));
        let mut threads = Vec::new();
        for _ in 0..8 {
            let mutex = Arc::clone(&mutex);
            threads.push(Thread::spawn("counter", move || {
                for _ in 0..1000 {
                    *mutex.lock() += 1;
                }
            }));
        }
        for thread in threads {
            thread.join();
        }
        assert_eq!(*mutex.lock(), 8000);
    }

    #[test]
    fn semaphore_blocks_until_released() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = Arc::clone(&sem);
        let thread = Thread::spawn("releaser", move || {
            sem2.release();
        });
        sem.acquire();
        thread.join();
    }

    #[test]
    fn condition_wakes_waiter() {
        let mutex = Arc::new(Mutex::new(false));
        let condition = Arc::new(Condition::new());
        let (m2, c2) = (Arc::clone(&mutex), Arc::clone(&condition));
        let thread = Thread::spawn("signaler", move || {
            *m2.lock() = true;
            c2.broadcast();
        });
        let mut ready = mutex.lock();
        while !*ready {
            ready = condition.wait(ready);
        }
        thread.join();
    }
}
