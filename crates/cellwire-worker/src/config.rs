use std::time::Duration;

use cellwire_frame::FrameConfig;

/// How long shutdown waits for a quit acknowledgement, and again for the exit.
pub const DEFAULT_QUIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest single wait between worker liveness checks.
pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(210);

/// Settings shared by both ends of a worker session.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub quit_timeout: Duration,
    pub poll_slice: Duration,
    /// Log every message sent and received at debug level.
    pub debug: bool,
    pub frame: FrameConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            quit_timeout: DEFAULT_QUIT_TIMEOUT,
            poll_slice: DEFAULT_POLL_SLICE,
            debug: false,
            frame: FrameConfig::default(),
        }
    }
}
