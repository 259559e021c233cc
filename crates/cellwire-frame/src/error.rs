/// Errors that can occur during frame encoding, decoding and polling.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header does not start with the cellwire magic.
    #[error("invalid frame magic (expected 0x4357 \"CW\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream. Any partially received frame is lost.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<cellwire_transport::TransportError> for FrameError {
    fn from(err: cellwire_transport::TransportError) -> Self {
        match err {
            cellwire_transport::TransportError::Io(io)
            | cellwire_transport::TransportError::Pair(io)
            | cellwire_transport::TransportError::Spawn(io) => FrameError::Io(io),
            other => FrameError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
