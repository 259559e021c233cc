use crate::protocol::{Side, Tag};

/// Errors that can occur in worker sessions.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] cellwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] cellwire_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or updating a value failed.
    #[error("value error: {0}")]
    Value(#[from] cellwire_value::ValueError),

    /// A name was registered twice in the same registry.
    #[error("value '{0}' is already registered")]
    DuplicateName(String),

    /// A registry lookup found no such name.
    #[error("no value named '{0}'")]
    UnknownName(String),

    /// A message carried a tag outside the protocol.
    #[error("unknown message tag '{0}'")]
    UnknownTag(String),

    /// A known tag arrived at the side that never handles it.
    #[error("{side} cannot handle '{tag}' messages")]
    UnexpectedTag { side: Side, tag: Tag },

    /// The frame lane does not match the message tag.
    #[error("'{tag}' message arrived on lane {lane}")]
    LaneMismatch { tag: Tag, lane: u16 },

    /// No factory or job with this name is registered.
    #[error("no {kind} named '{name}'")]
    UnknownOperation { kind: &'static str, name: String },

    /// A factory or job reported a failure.
    #[error("operation '{op}' failed: {message}")]
    Operation { op: String, message: String },

    /// The worker process is no longer alive.
    #[error("worker process crashed")]
    WorkerCrashed,

    /// The peer closed its end of the channel.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// A change notification could not be delivered to the peer.
    #[error("change notification failed: {0}")]
    PushFailed(String),

    /// The worker acknowledged a quit request while a job was running.
    ///
    /// Jobs should return this error as-is so the worker can stop.
    #[error("quit requested")]
    QuitRequested,

    /// The session has already been shut down.
    #[error("worker session is closed")]
    SessionClosed,
}

impl WorkerError {
    /// Convenience for factories and jobs that fail with a plain message.
    pub fn operation(op: impl Into<String>, message: impl Into<String>) -> Self {
        WorkerError::Operation {
            op: op.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
