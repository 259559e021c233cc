//! Duplex transport and process primitives for cellwire.
//!
//! This is the lowest layer of cellwire. It provides:
//! - [`IpcStream`], one end of a connected Unix socket pair with
//!   readiness polling
//! - [`ChildProcess`], a forked worker with liveness checks, bounded joins
//!   and forced termination
//!
//! Everything else builds on top of these two types.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod process;

pub use error::{Result, TransportError};
pub use traits::{IpcStream, PollRead};

#[cfg(unix)]
pub use process::{ChildProcess, ExitStatus};
