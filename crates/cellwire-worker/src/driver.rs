use std::sync::Arc;

use cellwire_transport::IpcStream;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::connection::{Connection, DrainOutcome};
use crate::error::{Result, WorkerError};
use crate::operations::Operations;
use crate::protocol::Side;

/// Lifecycle of the worker's message loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    /// Quit was acknowledged; the channel is still open.
    AckSent,
    /// The channel has been released.
    Terminated,
}

/// Runs the worker end of a session until the master asks it to quit.
pub struct WorkerDriver {
    connection: Option<Connection>,
    state: DriverState,
}

impl WorkerDriver {
    pub fn new(stream: IpcStream, operations: Arc<Operations>, config: &WorkerConfig) -> Result<Self> {
        Ok(Self {
            connection: Some(Connection::new(Side::Worker, stream, operations, config)?),
            state: DriverState::Running,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// The open connection, until [`WorkerDriver::terminate`] releases it.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Handle messages until a quit request has been acknowledged.
    ///
    /// Any protocol, factory or job error ends the loop and is returned.
    pub fn run(&mut self) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(WorkerError::SessionClosed);
        };
        info!(pid = std::process::id(), "worker started");
        loop {
            match connection.drain(None, 0)? {
                DrainOutcome::QuitRequested => break,
                outcome => debug!(?outcome, "drain returned without quit"),
            }
        }
        self.state = DriverState::AckSent;
        debug!("quit acknowledged");
        Ok(())
    }

    /// Close the channel. The master sees end-of-stream afterwards.
    pub fn terminate(&mut self) {
        if self.connection.take().is_some() {
            info!(pid = std::process::id(), "worker stopped");
        }
        self.state = DriverState::Terminated;
    }
}

/// Worker process entry point.
///
/// Consumes the worker's end of the channel and returns once the master's
/// quit request has been acknowledged.
pub fn worker_main(stream: IpcStream, operations: Arc<Operations>, debug: bool) -> Result<()> {
    let config = WorkerConfig {
        debug,
        ..WorkerConfig::default()
    };
    run_worker(stream, operations, &config)
}

pub(crate) fn run_worker(
    stream: IpcStream,
    operations: Arc<Operations>,
    config: &WorkerConfig,
) -> Result<()> {
    let mut driver = WorkerDriver::new(stream, operations, config)?;
    let result = driver.run();
    driver.terminate();
    result
}
