/// Errors that can occur in transport and process operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create the duplex socket pair.
    #[error("failed to create socket pair: {0}")]
    Pair(std::io::Error),

    /// Failed to fork the worker process.
    #[error("failed to fork worker process: {0}")]
    Spawn(std::io::Error),

    /// Failed to deliver a signal to the child process.
    #[error("failed to signal process {pid}: {source}")]
    Signal { pid: i32, source: std::io::Error },

    /// Failed to wait on the child process.
    #[error("failed to wait for process {pid}: {source}")]
    Wait { pid: i32, source: std::io::Error },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error was caused by a signal interrupting a system call.
    pub fn is_interrupted(&self) -> bool {
        let source = match self {
            TransportError::Pair(source)
            | TransportError::Spawn(source)
            | TransportError::Io(source) => source,
            TransportError::Signal { source, .. } | TransportError::Wait { source, .. } => source,
        };
        source.kind() == std::io::ErrorKind::Interrupted
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
