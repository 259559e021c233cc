use std::io::{self, ErrorKind, Write};

use bytes::BytesMut;
use cellwire_transport::IpcStream;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes whole frames to a byte stream.
///
/// A frame is written in full and flushed before `send` returns, so frames
/// from one writer never interleave. A peer that went away surfaces as
/// [`FrameError::ConnectionClosed`].
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    max_payload_size: usize,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload_size: config.max_payload_size,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.lane, frame.payload.as_ref())
    }

    /// Encode `payload` for `lane` and write it out.
    pub fn send(&mut self, lane: u16, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(lane, payload, &mut self.buf)?;

        let mut pending = &self.buf[..];
        while !pending.is_empty() {
            match self.inner.write(pending) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => pending = &pending[n..],
                Err(err) => retry_or_fail(err)?,
            }
        }
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) => retry_or_fail(err)?,
            }
        }
    }
}

impl FrameWriter<IpcStream> {
    /// Frame writer over an `IpcStream`, with the configured write timeout applied.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

/// `Ok` when the call was interrupted and should be repeated.
fn retry_or_fail(err: io::Error) -> Result<()> {
    match err.kind() {
        ErrorKind::Interrupted => Ok(()),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => Err(FrameError::ConnectionClosed),
        _ => Err(FrameError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_frame;
    use crate::lane::{COMMAND, CONTROL, VALUE};
    use crate::reader::FrameReader;

    #[test]
    fn frames_decode_in_order() {
        let mut sink = Vec::new();
        let mut writer = FrameWriter::new(&mut sink);
        writer.send(VALUE, b"new").unwrap();
        writer.write_frame(&Frame::new(COMMAND, "pull")).unwrap();

        let mut wire = BytesMut::from(sink.as_slice());
        let first = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let second = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(first, Frame::new(VALUE, "new"));
        assert_eq!(second, Frame::new(COMMAND, "pull"));
        assert!(wire.is_empty());
    }

    #[test]
    fn payload_too_large_rejected_before_writing() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut sink = Vec::new();
        let mut writer = FrameWriter::with_config(&mut sink, cfg);

        let err = writer.send(VALUE, b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(sink.is_empty());
    }

    #[test]
    fn short_writes_are_completed() {
        let mut sink = TwoBytesAtATime::default();
        FrameWriter::new(&mut sink).send(CONTROL, b"quit ack").unwrap();

        let mut reader = FrameReader::new(Cursor::new(sink.data));
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"quit ack");
    }

    #[test]
    fn zero_write_is_connection_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        assert!(matches!(
            writer.send(VALUE, b"x"),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn closed_peer_is_connection_closed() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(right);
        let mut writer = FrameWriter::new(left);
        assert!(matches!(
            writer.send(CONTROL, b"quit"),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[derive(Default)]
    struct TwoBytesAtATime {
        data: Vec<u8>,
        interrupted: bool,
    }

    impl Write for TwoBytesAtATime {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = buf.len().min(2);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
