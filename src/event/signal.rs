//! Self-pipe signal-to-event bridge.
//!
//! A signal handler may only call a small set of async-signal-safe
//! functions. Writing one byte to a pipe is one of them, so that is the only
//! thing the handler does; everything else (stopping the loop, invoking the
//! user's SIGUSR1 hook) happens later on the event-loop thread when it reads
//! from the pipe.

use super::source::Handler;
use crate::sync::Mutex;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static SIGNAL_WRITE_FD: OnceLock<RawFd> = OnceLock::new();

extern "C" fn forward_signal(signum: libc::c_int) {
    if let Some(&fd) = SIGNAL_WRITE_FD.get() {
        let byte = signum as u8;
        // SAFETY: write(2) is async-signal-safe; short writes of a single
        // byte cannot happen.
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

struct InstalledHandler {
    signum: libc::c_int,
    previous: libc::sighandler_t,
}

/// Owns the self-pipe and the installed signal handlers. Dropping it does
/// not restore previous handlers — by the time it is dropped the process is
/// shutting down, matching the source library's lifecycle (the bridge lives
/// exactly as long as the event loop does).
pub struct SignalBridge {
    read_fd: RawFd,
    write_fd: RawFd,
    installed: Vec<InstalledHandler>,
    stop_requested: Arc<AtomicBool>,
    sigusr1_handler: Mutex<Option<Handler>>,
}

impl SignalBridge {
    /// Installs handlers for SIGINT, SIGTERM, SIGUSR1, ignores SIGPIPE, and
    /// creates the self-pipe. If any installation fails, every handler
    /// installed so far in this call is unwound in reverse order before the
    /// error is returned (ordered teardown on partial-init failure).
    pub(super) fn install(
        stop_requested: Arc<AtomicBool>,
        sigusr1_handler: Option<Handler>,
    ) -> io::Result<SignalBridge> {
        let mut fds = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);
        set_nonblocking(read_fd)?;
        set_nonblocking(write_fd)?;

        // The forwarding handler needs the write end; there is only ever one
        // bridge per process so a `OnceLock` is sufficient (re-installing a
        // second bridge within the same process is not supported, matching
        // the source library's single-instance assumption).
        let _ = SIGNAL_WRITE_FD.set(write_fd);

        let mut installed = Vec::with_capacity(3);
        let result = (|| {
            installed.push(install_one(libc::SIGINT, forward_signal as usize)?);
            installed.push(install_one(libc::SIGTERM, forward_signal as usize)?);
            installed.push(install_one(libc::SIGUSR1, forward_signal as usize)?);
            installed.push(install_one(libc::SIGPIPE, libc::SIG_IGN)?);
            Ok(())
        })();

        if let Err(err) = result {
            for handler in installed.into_iter().rev() {
                unsafe {
                    libc::signal(handler.signum, handler.previous);
                }
            }
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
            return Err(err);
        }

        Ok(SignalBridge {
            read_fd,
            write_fd,
            installed,
            stop_requested,
            sigusr1_handler: Mutex::new(sigusr1_handler),
        })
    }

    pub(super) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Drains pending signal numbers from the pipe and demultiplexes each
    /// one, mirroring `signal.c`'s `signal_handle`: `SIGINT`/`SIGTERM`
    /// request an event-loop stop, `SIGUSR1` invokes the user-supplied
    /// hook, anything else is an unexpected signal and is only logged.
    pub(super) fn handle_readable(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n <= 0 {
                break;
            }
            for &signum in &buf[..n as usize] {
                self.dispatch_signal(signum as libc::c_int);
            }
        }
    }

    fn dispatch_signal(&self, signum: libc::c_int) {
        if signum == libc::SIGINT {
            log_info!("received SIGINT");
            self.stop_requested.store(true, Ordering::Release);
        } else if signum == libc::SIGTERM {
            log_info!("received SIGTERM");
            self.stop_requested.store(true, Ordering::Release);
        } else if signum == libc::SIGUSR1 {
            log_info!("received SIGUSR1");
            if let Some(hook) = self.sigusr1_handler.lock().as_mut() {
                hook();
            }
        } else {
            log_warn!("received unexpected signal {}", signum);
        }
    }

    /// Wakes a thread blocked in the event loop's multiplexer wait. Safe to
    /// call from any context, including signal handlers, since it only
    /// performs a `write(2)`.
    pub fn wake(&self) {
        let byte = 0u8;
        unsafe {
            libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

fn install_one(signum: libc::c_int, handler: libc::sighandler_t) -> io::Result<InstalledHandler> {
    let previous = unsafe { libc::signal(signum, handler) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(InstalledHandler { signum, previous })
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
