//! Length-prefixed message framing for cellwire.
//!
//! Every protocol message travels as one frame:
//! - A 2-byte magic number ("CW") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian lane ID grouping related message kinds
//!
//! Readers can poll for a complete frame with a timeout, which is what lets
//! the master interleave worker liveness checks with message reception.

pub mod codec;
pub mod error;
pub mod lane;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use lane::{lane_name, COMMAND, CONTROL, VALUE};
pub use reader::FrameReader;
pub use writer::FrameWriter;
