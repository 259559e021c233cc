use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use cellwire_transport::{IpcStream, PollRead};
use tracing::{trace, warn};

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Bytes of a partially received frame stay buffered across calls.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decode_buffered()? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    fn decode_buffered(&mut self) -> Result<Option<Frame>> {
        decode_frame(&mut self.buf, self.config.max_payload_size)
    }

    /// Read one chunk into the buffer, retrying on EINTR.
    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    if !self.buf.is_empty() {
                        warn!(buffered = self.buf.len(), "peer closed mid-frame");
                    }
                    return Err(FrameError::ConnectionClosed);
                }
                Ok(n) => {
                    trace!(bytes = n, "read chunk");
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Number of bytes received but not yet decoded into a frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

impl<T: Read + PollRead> FrameReader<T> {
    /// Wait for a complete frame.
    ///
    /// `None` blocks until a frame arrives, `Some(Duration::ZERO)` only
    /// decodes what is already available, anything else is an overall
    /// deadline. Returns `Ok(None)` if no complete frame arrived in time.
    pub fn poll_frame(&mut self, timeout: Option<Duration>) -> Result<Option<Frame>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(frame) = self.decode_buffered()? {
                return Ok(Some(frame));
            }

            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if !self.inner.poll_read_ready(remaining)? {
                return Ok(None);
            }

            match self.fill() {
                Ok(()) => {}
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    if remaining.is_some_and(|remaining| remaining.is_zero()) {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
