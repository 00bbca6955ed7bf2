//! Polymorphic read/write/close surface covering regular files, pipes, and
//! stream sockets.
//!
//! Every concrete kind below implements [`Io`] the same way: reads and
//! writes retry internally on interruption ([`robust_read`]/[`robust_write`])
//! and a short count is a legitimate result, never an error. After
//! [`Io::close`] (or drop) the handle must not be touched again; that
//! invariant is enforced here by consuming `self` on close and by RAII drop
//! on the underlying owned fd otherwise.

use crate::error::{Result, RuntimeError};
use std::io as stdio;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

/// Point-in-time status of an [`Io`], used by the logger to track rotatable
/// output size without a full read.
#[derive(Copy, Clone, Debug, Default)]
pub struct IoStatus {
    /// Current size in bytes, if the underlying kind supports reporting one
    /// (regular files do; pipes and sockets do not).
    pub size: Option<u64>,
}

/// A handle-bearing read/write/close surface.
///
/// Some implementors are read-only (nothing here enforces that beyond
/// `write` returning [`RuntimeError::NotSupported`]); some are write-only
/// (the logger's stderr fallback sink); most are bidirectional.
pub trait Io: Send {
    /// Reads into `buf`, retrying internally on interruption. A short read
    /// (including zero bytes with no error) is a legitimate result.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes from `buf`, retrying internally on interruption. A partial
    /// write is acceptable and surfaced as a short count; a zero-length
    /// write reported as [`RuntimeError::WouldBlock`] is a writability
    /// signal, not an error — [`crate::writer::Writer`] depends on this.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reports current status (currently just size, for rotation). Not
    /// every kind supports this; the default answers
    /// [`RuntimeError::NotSupported`].
    fn status(&self) -> Result<IoStatus> {
        Err(RuntimeError::NotSupported("status".to_owned()))
    }

    /// The raw handle, for registration with the event loop.
    fn handle(&self) -> RawFd;
}

/// Retries `read(2)`-alikes on `EINTR`, exactly as the source library's
/// `robust_read` does.
pub fn robust_read(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    loop {
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = stdio::Error::last_os_error();
        if err.kind() == stdio::ErrorKind::Interrupted {
            continue;
        }
        return Err(RuntimeError::from_io(err));
    }
}

/// Retries `write(2)`-alikes on `EINTR`, exactly as the source library's
/// `robust_write` does. Unlike the original, a partial write is simply
/// returned rather than looped over — callers (the [`Fifo`](crate::fifo::Fifo)
/// and [`Writer`](crate::writer::Writer)) are built to handle short counts.
pub fn robust_write(fd: RawFd, buf: &[u8]) -> Result<usize> {
    loop {
        let rc = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = stdio::Error::last_os_error();
        if err.kind() == stdio::ErrorKind::Interrupted {
            continue;
        }
        return Err(RuntimeError::from_io(err));
    }
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> stdio::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(stdio::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(stdio::Error::last_os_error());
    }
    Ok(())
}

/// Write-only wrapper around the process's `stderr`, used by the logger as
/// its default output before a real sink is installed (mirrors `log.c`'s
/// `log_stderr_output`/`stderr_create`).
#[derive(Debug, Default)]
pub struct Stderr;

impl Io for Stderr {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(RuntimeError::NotSupported("read on stderr".to_owned()))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = robust_write(libc::STDERR_FILENO, buf)?;
        use std::io::Write;
        let _ = stdio::stderr().flush();
        Ok(written)
    }

    fn handle(&self) -> RawFd {
        libc::STDERR_FILENO
    }
}

/// A regular file or character device, opened blocking and optionally
/// switched to non-blocking afterward (mirrors `file.c`, which always opens
/// blocking and then flips `O_NONBLOCK` with `fcntl` so `open` itself never
/// races a non-blocking special file).
#[derive(Debug)]
pub struct File {
    fd: OwnedFd,
}

impl File {
    pub fn open<P: AsRef<Path>>(path: P, flags: libc::c_int, mode: libc::mode_t) -> Result<File> {
        let path = std::ffi::CString::new(path.as_ref().as_os_str().as_encoded_bytes())
            .map_err(|_| RuntimeError::InvalidArgument("path contains a NUL byte".to_owned()))?;
        let open_flags = flags & !libc::O_NONBLOCK;
        let fd = unsafe { libc::open(path.as_ptr(), open_flags, mode as libc::c_int) };
        if fd < 0 {
            return Err(RuntimeError::from_io(stdio::Error::last_os_error()));
        }
        if flags & libc::O_NONBLOCK != 0 {
            if let Err(err) = set_nonblocking(fd, true) {
                unsafe { libc::close(fd) };
                return Err(RuntimeError::from_io(err));
            }
        }
        Ok(File {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }
}

impl Io for File {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        robust_read(self.fd.as_raw_fd(), buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        robust_write(self.fd.as_raw_fd(), buf)
    }

    fn status(&self) -> Result<IoStatus> {
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(self.fd.as_raw_fd(), &mut stat) } < 0 {
            return Err(RuntimeError::from_io(stdio::Error::last_os_error()));
        }
        Ok(IoStatus {
            size: Some(stat.st_size as u64),
        })
    }

    fn handle(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Read half of a [`pipe`], usable as a generic event source.
#[derive(Debug)]
pub struct PipeReader {
    fd: OwnedFd,
}

/// Write half of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    fd: OwnedFd,
}

impl Io for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        robust_read(self.fd.as_raw_fd(), buf)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(RuntimeError::NotSupported("write on pipe read half".to_owned()))
    }

    fn handle(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Io for PipeWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(RuntimeError::NotSupported("read on pipe write half".to_owned()))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        robust_write(self.fd.as_raw_fd(), buf)
    }

    fn handle(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Creates an anonymous pipe, optionally putting either half in
/// non-blocking mode.
pub fn pipe(nonblocking_read: bool, nonblocking_write: bool) -> Result<(PipeReader, PipeWriter)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(RuntimeError::from_io(stdio::Error::last_os_error()));
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let result = (|| {
        if nonblocking_read {
            set_nonblocking(read_fd, true)?;
        }
        if nonblocking_write {
            set_nonblocking(write_fd, true)?;
        }
        Ok(())
    })();

    if let Err(err) = result {
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return Err(RuntimeError::from_io(err));
    }

    Ok((
        PipeReader {
            fd: unsafe { OwnedFd::from_raw_fd(read_fd) },
        },
        PipeWriter {
            fd: unsafe { OwnedFd::from_raw_fd(write_fd) },
        },
    ))
}

/// Address family a [`Socket`] was created for, recorded for diagnostics
/// and for `socket_get_address_family_name`-style log messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Family {
    Inet,
    Inet6,
    Unix,
}

/// A connected stream socket: the accepted (or connected) end of a TCP or
/// Unix-domain stream. Always non-blocking.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
    family: Family,
}

impl Socket {
    fn from_tcp(stream: TcpStream, family: Family) -> Result<Socket> {
        stream.set_nonblocking(true).map_err(RuntimeError::from_io)?;
        Ok(Socket {
            fd: unsafe { OwnedFd::from_raw_fd(stream.into_raw_fd()) },
            family,
        })
    }

    fn from_unix(stream: UnixStream) -> Result<Socket> {
        stream.set_nonblocking(true).map_err(RuntimeError::from_io)?;
        Ok(Socket {
            fd: unsafe { OwnedFd::from_raw_fd(stream.into_raw_fd()) },
            family: Family::Unix,
        })
    }

    pub fn family(&self) -> Family {
        self.family
    }
}

impl Io for Socket {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        robust_read(self.fd.as_raw_fd(), buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        robust_write(self.fd.as_raw_fd(), buf)
    }

    fn handle(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// A listening socket. `accept` invokes a caller-supplied
/// `create_allocated`-equivalent factory on every accepted connection so a
/// polymorphic per-connection [`Io`] can be minted (e.g. a future
/// TLS-wrapping layer), mirroring the source library's
/// `socket->create_allocated` hook.
pub enum Listener {
    Tcp { inner: TcpListener, dual_stack: bool },
    Unix { inner: UnixListener },
}

impl Listener {
    pub fn bind_tcp(addr: std::net::SocketAddr) -> Result<Listener> {
        let inner = TcpListener::bind(addr).map_err(RuntimeError::from_io)?;
        inner.set_nonblocking(true).map_err(RuntimeError::from_io)?;
        let dual_stack = addr.is_ipv6();
        Ok(Listener::Tcp { inner, dual_stack })
    }

    pub fn bind_unix<P: AsRef<Path>>(path: P) -> Result<Listener> {
        let inner = UnixListener::bind(path).map_err(RuntimeError::from_io)?;
        inner.set_nonblocking(true).map_err(RuntimeError::from_io)?;
        Ok(Listener::Unix { inner })
    }

    pub fn handle(&self) -> RawFd {
        match self {
            Listener::Tcp { inner, .. } => inner.as_raw_fd(),
            Listener::Unix { inner } => inner.as_raw_fd(),
        }
    }

    /// Accepts one pending connection, or `Err(WouldBlock)` if none is
    /// ready. `factory` plays the role of `create_allocated`: it receives
    /// the freshly-accepted [`Socket`] and returns whatever boxed [`Io`] the
    /// caller wants to treat it as.
    pub fn accept<F, T>(&self, factory: F) -> Result<T>
    where
        F: FnOnce(Socket) -> T,
    {
        match self {
            Listener::Tcp { inner, .. } => {
                let (stream, _addr) = inner.accept().map_err(RuntimeError::from_io)?;
                let socket = Socket::from_tcp(stream, self.address_family())?;
                Ok(factory(socket))
            }
            Listener::Unix { inner } => {
                let (stream, _addr) = inner.accept().map_err(RuntimeError::from_io)?;
                let socket = Socket::from_unix(stream)?;
                Ok(factory(socket))
            }
        }
    }

    fn address_family(&self) -> Family {
        match self {
            Listener::Tcp { dual_stack, inner } => {
                if *dual_stack {
                    Family::Inet6
                } else if inner
                    .local_addr()
                    .map(|a| a.is_ipv6())
                    .unwrap_or(false)
                {
                    Family::Inet6
                } else {
                    Family::Inet
                }
            }
            Listener::Unix { .. } => Family::Unix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_round_trip() {
        let (mut reader, mut writer) = pipe(false, false).unwrap();
        assert_eq!(writer.write(b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn tcp_listener_accepts_connection() {
        let listener = Listener::bind_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = match &listener {
            Listener::Tcp { inner, .. } => inner.local_addr().unwrap(),
            _ => unreachable!(),
        };
        let _client = TcpStream::connect(addr).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let accepted = listener.accept(|socket| socket);
        assert!(accepted.is_ok());
        assert_eq!(accepted.unwrap().family(), Family::Inet);
    }

    #[test]
    fn file_status_reports_size() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("daemon-runtime-io-test-{}", std::process::id()));
        std::fs::write(&path, b"0123456789").unwrap();
        let file = File::open(&path, libc::O_RDONLY, 0).unwrap();
        let status = file.status().unwrap();
        assert_eq!(status.size, Some(10));
        std::fs::remove_file(&path).ok();
    }
}
