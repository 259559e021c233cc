use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cellwire_transport::{ChildProcess, ExitStatus, IpcStream};
use cellwire_value::ValueRef;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::connection::{Connection, DrainOutcome};
use crate::driver::run_worker;
use crate::error::{Result, WorkerError};
use crate::operations::Operations;
use crate::protocol::{Invocation, Message, Side};
use crate::registry::ValueRegistry;

/// Master-side handle to a forked worker process.
///
/// Inputs published with [`Worker::add_input`] are mirrored in the worker;
/// values built by [`Worker::create`] are mirrored back here. Every wait
/// for worker messages is sliced so that a dead worker is noticed within
/// one [`WorkerConfig::poll_slice`].
///
/// Dropping the handle shuts the worker down.
#[derive(Debug)]
pub struct Worker {
    connection: Connection,
    process: ChildProcess,
    config: WorkerConfig,
    crashed: bool,
    closed: bool,
}

impl Worker {
    /// Fork a worker that serves `operations`.
    pub fn spawn(operations: Operations, config: WorkerConfig) -> Result<Self> {
        let operations = Arc::new(operations);
        let (master_end, worker_end) = IpcStream::pair()?;

        let worker_operations = Arc::clone(&operations);
        let worker_config = config.clone();
        let process = ChildProcess::fork_closing(&[master_end.as_raw_fd()], move || {
            match run_worker(worker_end, worker_operations, &worker_config) {
                Ok(()) => 0,
                Err(err) => {
                    error!(error = %err, "worker failed");
                    1
                }
            }
        })?;
        info!(pid = process.pid(), "worker spawned");

        let connection = Connection::new(Side::Master, master_end, operations, &config)?;
        Ok(Self {
            connection,
            process,
            config,
            crashed: false,
            closed: false,
        })
    }

    /// Run `body` against a fresh worker and shut it down afterwards.
    ///
    /// The worker is shut down even when `body` fails; the body's error wins
    /// over a shutdown error.
    pub fn session<T, F>(operations: Operations, config: WorkerConfig, body: F) -> Result<T>
    where
        F: FnOnce(&mut Worker) -> Result<T>,
    {
        let mut worker = Worker::spawn(operations, config)?;
        let outcome = body(&mut worker);
        let shutdown = worker.shutdown();
        let value = outcome?;
        shutdown?;
        Ok(value)
    }

    pub fn pid(&self) -> i32 {
        self.process.pid()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Whether the worker has been observed dead outside of shutdown.
    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The worker's exit status, once it has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.process.status()
    }

    /// Mirrors of the values the worker created.
    pub fn outputs(&self) -> &ValueRegistry {
        self.connection.mirrors()
    }

    /// Values published to the worker.
    pub fn inputs(&self) -> &ValueRegistry {
        self.connection.published()
    }

    /// Publish `value` to the worker under `name`.
    pub fn add_input(&mut self, name: impl Into<String>, value: &ValueRef) -> Result<()> {
        self.ensure_active()?;
        self.connection.publish_new(name, Rc::clone(value))
    }

    /// Publish every entry of `inputs`, in registration order.
    pub fn add_inputs(&mut self, inputs: &ValueRegistry) -> Result<()> {
        for (name, value) in inputs.iter() {
            self.add_input(name, value)?;
        }
        Ok(())
    }

    /// Ask the worker to build a value with `factory` and wait for its mirror.
    pub fn create(&mut self, name: impl Into<String>, factory: Invocation) -> Result<ValueRef> {
        let name = name.into();
        self.ensure_active()?;
        if self.connection.mirrors().contains(&name) {
            return Err(WorkerError::DuplicateName(name));
        }

        self.connection.send(&Message::CreateValue {
            name: name.clone(),
            factory,
        })?;
        while !self.connection.mirrors().contains(&name) {
            self.poll_with_liveness(None, 1)?;
        }
        Ok(Rc::clone(self.connection.mirrors().get(&name)?))
    }

    /// Ask the worker to bring a created value up to date.
    ///
    /// Does not wait; the result arrives as a change of the mirror.
    pub fn pull(&mut self, name: &str) -> Result<()> {
        self.ensure_active()?;
        self.connection.send(&Message::PullValue {
            name: name.to_string(),
        })
    }

    /// Ask the worker to run a job. Does not wait for it to finish.
    pub fn run(&mut self, job: Invocation) -> Result<()> {
        self.ensure_active()?;
        self.connection.send(&Message::RunJob { job })
    }

    /// Handle worker messages while checking that the worker is alive.
    ///
    /// Same arguments as [`Connection::drain`]; a dead worker or a closed
    /// channel yields [`WorkerError::WorkerCrashed`].
    pub fn process(&mut self, max_wait: Option<Duration>, max_count: usize) -> Result<DrainOutcome> {
        self.ensure_active()?;
        self.poll_with_liveness(max_wait, max_count)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.closed {
            return Err(WorkerError::SessionClosed);
        }
        if self.crashed {
            return Err(WorkerError::WorkerCrashed);
        }
        self.connection.check()
    }

    fn poll_with_liveness(
        &mut self,
        max_wait: Option<Duration>,
        max_count: usize,
    ) -> Result<DrainOutcome> {
        if self.crashed {
            return Err(WorkerError::WorkerCrashed);
        }

        let deadline = max_wait.map(|wait| Instant::now() + wait);
        let mut handled = 0usize;
        loop {
            if !self.process.is_alive()? {
                return Err(self.mark_crashed());
            }

            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            let slice = remaining.map_or(self.config.poll_slice, |remaining| {
                remaining.min(self.config.poll_slice)
            });
            match self.connection.next_message(Some(slice)) {
                Ok(Some(message)) => {
                    if let Some(outcome) = self.connection.dispatch(message)? {
                        return Ok(outcome);
                    }
                    handled += 1;
                    if max_count != 0 && handled >= max_count {
                        return Ok(DrainOutcome::Completed);
                    }
                }
                Ok(None) => {
                    if remaining.is_some_and(|remaining| remaining <= slice) {
                        return Ok(DrainOutcome::TimedOut);
                    }
                }
                Err(WorkerError::Disconnected(reason)) => {
                    debug!(pid = self.pid(), %reason, "worker channel closed");
                    return Err(self.mark_crashed());
                }
                Err(err) => {
                    if !self.process.is_alive()? {
                        debug!(pid = self.pid(), error = %err, "channel failed after worker exit");
                        return Err(self.mark_crashed());
                    }
                    return Err(err);
                }
            }
        }
    }

    fn mark_crashed(&mut self) -> WorkerError {
        if !self.crashed && !self.closed {
            warn!(pid = self.pid(), status = ?self.process.status(), "worker process crashed");
        }
        self.crashed = true;
        WorkerError::WorkerCrashed
    }

    /// Stop the worker: ask it to quit, wait for the acknowledgement and the
    /// exit, then kill and reap whatever is left.
    ///
    /// Each wait is bounded by [`WorkerConfig::quit_timeout`]. Calling this
    /// again after it returned is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let pid = self.pid();
        let mut deferred = None;

        if !self.crashed {
            match self.connection.send(&Message::Quit) {
                Ok(()) => match self.poll_with_liveness(Some(self.config.quit_timeout), 0) {
                    Ok(DrainOutcome::AckReceived) => debug!(pid, "worker acknowledged quit"),
                    Ok(outcome) => debug!(pid, ?outcome, "no quit acknowledgement"),
                    Err(WorkerError::WorkerCrashed) => {
                        debug!(pid, "worker exited before acknowledging quit")
                    }
                    Err(err) if !self.process.is_alive().unwrap_or(false) => {
                        debug!(pid, error = %err, "worker exited before acknowledging quit")
                    }
                    Err(err) => {
                        warn!(pid, error = %err, "error while waiting for quit acknowledgement");
                        deferred = Some(err);
                    }
                },
                Err(err) => debug!(pid, error = %err, "could not send quit"),
            }
        }

        self.join_retrying(Some(self.config.quit_timeout))?;
        self.process.terminate()?;
        self.join_retrying(None)?;
        info!(pid, status = ?self.process.status(), "worker shut down");

        match deferred {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn join_retrying(&mut self, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
        loop {
            match self.process.join(timeout) {
                Ok(status) => return Ok(status),
                Err(err) if err.is_interrupted() => {
                    debug!(pid = self.pid(), "join interrupted, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(pid = self.pid(), error = %err, "worker shutdown on drop failed");
        }
    }
}
