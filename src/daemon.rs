//! Double-fork daemonization.
//!
//! Grounded on `original_source/daemon.c`'s `daemon_start`: a status pipe
//! lets the very first parent process block until the daemon has either
//! fully started or failed, rather than exiting immediately and leaving a
//! caller's shell script racing against an async failure; the first child
//! detaches the session and, for the conventional double-fork, forks again
//! so the final daemon process can never re-acquire a controlling terminal;
//! whichever process ends up being the long-lived one acquires the PID
//! file, opens the log file, and redirects the standard streams before
//! reporting success back up the status pipe.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::{Result, RuntimeError};
use crate::pidfile::PidFile;

/// What [`daemonize`] produces in the process that ends up running the
/// daemon body: the log file (already `dup2`'d onto stdout/stderr) and,
/// if a PID file path was given, the held lock.
pub struct Daemon {
    pid_file: Option<PidFile>,
    log_path: PathBuf,
}

impl Daemon {
    pub fn pid_file(&self) -> Option<&PidFile> {
        self.pid_file.as_ref()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Forks into the background and redirects stdio into `log_path`,
/// acquiring `pid_path` (if given) along the way.
///
/// When `double_fork` is `true` (the conventional, SysV-style daemon
/// sequence) the result can never re-acquire a controlling terminal, at
/// the cost of the final process's parent becoming PID 1 / the nearest
/// subreaper rather than the original caller. Passing `false` skips the
/// second fork — the daemon remains a direct child of the caller's
/// process, which some supervisors (e.g. those that track a dæmon by its
/// immediate child PID) require.
///
/// This function only returns in the process that goes on to run the
/// daemon; the original calling process exits from inside this call,
/// with a status reflecting whether startup (up to and including log
/// file and PID file setup) succeeded.
pub fn daemonize(pid_path: Option<&Path>, log_path: &Path, double_fork: bool) -> Result<Daemon> {
    let (status_read, status_write) = status_pipe()?;

    match fork()? {
        ForkResult::Parent(_child_pid) => {
            close_fd(status_write);
            let status = read_status_byte(status_read);
            close_fd(status_read);
            match status {
                StartupStatus::Ok => std::process::exit(0),
                StartupStatus::AlreadyRunning => {
                    eprintln!("daemon is already running");
                    std::process::exit(1);
                }
                StartupStatus::Error => std::process::exit(1),
            }
        }
        ForkResult::Child => close_fd(status_read),
    }

    setsid()?;
    chdir_root()?;
    // SAFETY: umask affects only this process and every descendant forked
    // from here on; no other thread exists yet at this point in startup.
    unsafe {
        libc::umask(0);
    }

    if double_fork {
        match fork()? {
            ForkResult::Parent(_child_pid) => {
                // The intermediate parent's job ends here; it never had a
                // copy of the pipe's read end to report through, and the
                // eventual success/failure status comes from the final
                // child via `status_write`, which this process still
                // holds open — close it so the pipe doesn't look
                // artificially kept alive once this process exits.
                close_fd(status_write);
                std::process::exit(0);
            }
            ForkResult::Child => {}
        }
    }

    let result = finish_startup(pid_path, log_path);
    let status = match &result {
        Ok(_) => StartupStatus::Ok,
        Err(RuntimeError::AlreadyExists) => StartupStatus::AlreadyRunning,
        Err(_) => StartupStatus::Error,
    };
    report_status(status_write, status);
    close_fd(status_write);
    result
}

fn finish_startup(pid_path: Option<&Path>, log_path: &Path) -> Result<Daemon> {
    let pid_file = pid_path.map(PidFile::acquire).transpose()?;

    let log_file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(true)
        .open(log_path)
        .map_err(RuntimeError::from_io)?;

    redirect_stdio(log_file.as_raw_fd())?;

    Ok(Daemon {
        pid_file,
        log_path: log_path.to_path_buf(),
    })
}

/// Redirects stdin from `/dev/null` and stdout/stderr onto `log_fd`.
/// Mirrors `daemon_start`'s final stream setup exactly.
fn redirect_stdio(log_fd: RawFd) -> Result<()> {
    let dev_null = OpenOptions::new()
        .read(true)
        .open("/dev/null")
        .map_err(RuntimeError::from_io)?;

    dup2_checked(dev_null.as_raw_fd(), libc::STDIN_FILENO)?;
    dup2_checked(log_fd, libc::STDOUT_FILENO)?;
    dup2_checked(log_fd, libc::STDERR_FILENO)?;
    Ok(())
}

fn dup2_checked(from: RawFd, to: RawFd) -> Result<()> {
    if unsafe { libc::dup2(from, to) } < 0 {
        return Err(RuntimeError::from_io(io::Error::last_os_error()));
    }
    Ok(())
}

enum ForkResult {
    Parent(libc::pid_t),
    Child,
}

fn fork() -> Result<ForkResult> {
    // SAFETY: `fork` is safe to call here; no other threads have been
    // spawned yet in the calling process at any point this function is
    // used (daemonization happens at the very start of `main`).
    match unsafe { libc::fork() } {
        -1 => Err(RuntimeError::from_io(io::Error::last_os_error())),
        0 => Ok(ForkResult::Child),
        pid => Ok(ForkResult::Parent(pid)),
    }
}

fn setsid() -> Result<()> {
    if unsafe { libc::setsid() } < 0 {
        return Err(RuntimeError::from_io(io::Error::last_os_error()));
    }
    Ok(())
}

fn chdir_root() -> Result<()> {
    let root = std::ffi::CString::new("/").unwrap();
    if unsafe { libc::chdir(root.as_ptr()) } != 0 {
        return Err(RuntimeError::from_io(io::Error::last_os_error()));
    }
    Ok(())
}

fn status_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(RuntimeError::from_io(io::Error::last_os_error()));
    }
    Ok((fds[0], fds[1]))
}

/// The three outcomes the grandchild can report back up the status pipe,
/// mirroring `daemon_start`'s `{OK, ALREADY_RUNNING, ERROR}` trio.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum StartupStatus {
    Ok,
    AlreadyRunning,
    Error,
}

fn read_status_byte(fd: RawFd) -> StartupStatus {
    let mut byte = [0u8; 1];
    let n = unsafe { libc::read(fd, byte.as_mut_ptr() as *mut libc::c_void, 1) };
    if n != 1 {
        return StartupStatus::Error;
    }
    match byte[0] {
        0 => StartupStatus::Ok,
        1 => StartupStatus::AlreadyRunning,
        _ => StartupStatus::Error,
    }
}

fn report_status(fd: RawFd, status: StartupStatus) {
    let byte = [match status {
        StartupStatus::Ok => 0u8,
        StartupStatus::AlreadyRunning => 1u8,
        StartupStatus::Error => 2u8,
    }];
    unsafe {
        libc::write(fd, byte.as_ptr() as *const libc::c_void, 1);
    }
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `daemonize` forks and the parent branch calls `std::process::exit`,
    // so it cannot be exercised directly inside the test harness process
    // (it would tear the harness down). These tests instead cover the
    // pieces that don't fork.

    #[test]
    fn redirect_stdio_rejects_bad_fd() {
        // An obviously invalid fd should surface as an error, not panic.
        let result = dup2_checked(-1, libc::STDOUT_FILENO);
        assert!(result.is_err());
    }

    #[test]
    fn status_pipe_round_trips_ok() {
        let (read_fd, write_fd) = status_pipe().unwrap();
        report_status(write_fd, StartupStatus::Ok);
        assert_eq!(read_status_byte(read_fd), StartupStatus::Ok);
        close_fd(read_fd);
        close_fd(write_fd);
    }

    #[test]
    fn status_pipe_round_trips_already_running() {
        let (read_fd, write_fd) = status_pipe().unwrap();
        report_status(write_fd, StartupStatus::AlreadyRunning);
        assert_eq!(read_status_byte(read_fd), StartupStatus::AlreadyRunning);
        close_fd(read_fd);
        close_fd(write_fd);
    }

    #[test]
    fn status_pipe_round_trips_error() {
        let (read_fd, write_fd) = status_pipe().unwrap();
        report_status(write_fd, StartupStatus::Error);
        assert_eq!(read_status_byte(read_fd), StartupStatus::Error);
        close_fd(read_fd);
        close_fd(write_fd);
    }
}
