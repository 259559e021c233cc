//! Master/worker value synchronization.
//!
//! A master forks a worker process and talks to it over a socket pair.
//! Values the master publishes are mirrored in the worker and kept current;
//! values the worker creates on request are mirrored back the same way.
//! Change reports always follow the announcement of the value they concern,
//! and a dirty value is sent without a payload so the receiving side can
//! recompute or pull it instead of trusting a stale one.
//!
//! The worker inherits its [`Operations`] table at fork time, so requests
//! only name the factory or job to run together with JSON arguments.

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod master;
pub mod operations;
pub mod protocol;
pub mod registry;

pub use config::{WorkerConfig, DEFAULT_POLL_SLICE, DEFAULT_QUIT_TIMEOUT};
pub use connection::{Connection, DrainOutcome};
pub use driver::{worker_main, DriverState, WorkerDriver};
pub use error::{Result, WorkerError};
pub use master::Worker;
pub use operations::{Factory, Job, Operations};
pub use protocol::{Invocation, Message, Side, Snapshot, Tag};
pub use registry::{Intake, ValueRegistry};
