use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Result, TransportError};

/// Readiness polling for byte streams.
///
/// `timeout` of `None` blocks until data (or EOF) is available, a zero
/// timeout is a non-blocking check, anything else waits at most that long.
pub trait PollRead {
    /// Returns `true` if a read would not block.
    fn poll_read_ready(&self, timeout: Option<Duration>) -> std::io::Result<bool>;
}

/// One end of a connected duplex channel implementing Read + Write.
///
/// On Unix this wraps one half of a `socketpair(2)`. Message boundaries are
/// not preserved here; the frame layer adds them.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl IpcStream {
    /// Create a connected pair of streams.
    ///
    /// The first end is conventionally kept by the master, the second is
    /// handed to the worker.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) =
            std::os::unix::net::UnixStream::pair().map_err(TransportError::Pair)?;
        tracing::debug!("created duplex socket pair");
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for IpcStream {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
        }
    }
}

impl PollRead for IpcStream {
    fn poll_read_ready(&self, timeout: Option<Duration>) -> std::io::Result<bool> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.poll_read_ready(timeout),
        }
    }
}

#[cfg(unix)]
impl PollRead for std::os::unix::net::UnixStream {
    fn poll_read_ready(&self, timeout: Option<Duration>) -> std::io::Result<bool> {
        use std::os::fd::AsRawFd;
        poll_fd(self.as_raw_fd(), timeout)
    }
}

#[cfg(unix)]
fn poll_fd(fd: std::os::fd::RawFd, timeout: Option<Duration>) -> std::io::Result<bool> {
    let deadline = timeout.map(|timeout| std::time::Instant::now() + timeout);
    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                // Round up so sub-millisecond waits still sleep.
                remaining.as_micros().div_ceil(1000).min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        // POLLHUP/POLLERR count as ready: the following read reports EOF or the error.
        return Ok(rc > 0);
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => f.debug_struct("IpcStream").field("type", &"unix").finish(),
        }
    }
}
