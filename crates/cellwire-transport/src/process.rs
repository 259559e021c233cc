use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};

/// Interval between non-blocking reaps while waiting with a deadline.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Exit code used when the child closure panics.
pub const PANIC_EXIT_CODE: i32 = 101;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process called `exit`/`_exit` with this code.
    Exited(i32),
    /// The process was killed by this signal.
    Signaled(i32),
    /// The process was reaped by someone else; its status is unknown.
    Lost,
}

impl ExitStatus {
    fn from_raw(status: libc::c_int) -> Self {
        if libc::WIFEXITED(status) {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            ExitStatus::Lost
        }
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

/// A forked child process.
///
/// The child runs a closure in a copy of the parent's address space and
/// leaves through `_exit`, so no parent destructors or exit handlers run twice.
/// Dropping an unreaped handle kills and reaps the child.
#[derive(Debug)]
pub struct ChildProcess {
    pid: libc::pid_t,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    /// Fork and run `child` in the new process; its return value becomes the exit code.
    ///
    /// In the parent, `child` is dropped without being called, which closes any
    /// descriptors it captured (for example the worker's end of a socket pair).
    pub fn fork<F>(child: F) -> Result<Self>
    where
        F: FnOnce() -> i32,
    {
        Self::fork_closing(&[], child)
    }

    /// Like [`ChildProcess::fork`], but the child first closes `inherited`.
    ///
    /// Pass the parent's ends of channels shared with the child, so the child
    /// sees EOF once the parent is gone.
    pub fn fork_closing<F>(inherited: &[RawFd], child: F) -> Result<Self>
    where
        F: FnOnce() -> i32,
    {
        // SAFETY: the child starts with only the forking thread. Locks other
        // threads held at fork time (stderr, the tracing dispatcher, anything
        // behind a std Mutex) stay held in the child, so `child` must not rely
        // on state those threads were mutating. The child never returns into
        // the caller's stack; it leaves through `_exit`.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(TransportError::Spawn(io::Error::last_os_error()));
        }

        if pid == 0 {
            for fd in inherited {
                // SAFETY: the child owns its copy of `fd` and never uses it again.
                unsafe { libc::close(*fd) };
            }
            let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(child))
                .unwrap_or(PANIC_EXIT_CODE);
            // SAFETY: `_exit` terminates the process immediately and never returns.
            unsafe { libc::_exit(code) }
        }

        debug!(pid, "forked child process");
        Ok(Self { pid, status: None })
    }

    /// Process id of the child.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Exit status, once the child has been reaped.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Reap the child if it has exited, without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }

        let mut raw: libc::c_int = 0;
        // SAFETY: `raw` is a valid out-pointer and `self.pid` is our own child.
        let rc = unsafe { libc::waitpid(self.pid, &mut raw, libc::WNOHANG) };
        match rc {
            0 => Ok(None),
            rc if rc == self.pid => Ok(Some(self.record(ExitStatus::from_raw(raw)))),
            _ => self.wait_failed(io::Error::last_os_error()).map(Some),
        }
    }

    /// Whether the child is still running. Reaps it if it has exited.
    pub fn is_alive(&mut self) -> Result<bool> {
        Ok(self.try_wait()?.is_none())
    }

    /// Wait for the child to exit.
    ///
    /// With `Some(timeout)` this returns `Ok(None)` if the child is still
    /// running when the timeout expires. With `None` it blocks until the child
    /// is reaped. An interrupted blocking wait is reported as an error whose
    /// [`TransportError::is_interrupted`] is true; callers decide whether to retry.
    pub fn join(&mut self, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
        match timeout {
            Some(timeout) => self.join_until(Instant::now() + timeout),
            None => self.join_blocking().map(Some),
        }
    }

    fn join_until(&mut self, deadline: Instant) -> Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            std::thread::sleep(remaining.min(JOIN_POLL_INTERVAL));
        }
    }

    fn join_blocking(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let mut raw: libc::c_int = 0;
        // SAFETY: `raw` is a valid out-pointer and `self.pid` is our own child.
        let rc = unsafe { libc::waitpid(self.pid, &mut raw, 0) };
        if rc == self.pid {
            return Ok(self.record(ExitStatus::from_raw(raw)));
        }
        self.wait_failed(io::Error::last_os_error())
    }

    fn wait_failed(&mut self, err: io::Error) -> Result<ExitStatus> {
        if err.raw_os_error() == Some(libc::ECHILD) {
            warn!(pid = self.pid, "child already reaped elsewhere");
            return Ok(self.record(ExitStatus::Lost));
        }
        Err(TransportError::Wait {
            pid: self.pid,
            source: err,
        })
    }

    fn record(&mut self, status: ExitStatus) -> ExitStatus {
        debug!(pid = self.pid, ?status, "child process reaped");
        self.status = Some(status);
        status
    }

    /// Send `signal` to the child. A child that is already gone is not an error.
    pub fn send_signal(&self, signal: libc::c_int) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }

        // SAFETY: plain syscall on our own child's pid.
        let rc = unsafe { libc::kill(self.pid, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(TransportError::Signal {
            pid: self.pid,
            source: err,
        })
    }

    /// Forcefully terminate the child (`SIGKILL`).
    pub fn terminate(&self) -> Result<()> {
        debug!(pid = self.pid, "terminating child process");
        self.send_signal(libc::SIGKILL)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.status.is_some() {
            return;
        }
        if let Err(err) = self.terminate() {
            warn!(pid = self.pid, error = %err, "failed to kill child on drop");
            return;
        }
        loop {
            match self.join_blocking() {
                Ok(_) => return,
                Err(err) if err.is_interrupted() => continue,
                Err(err) => {
                    warn!(pid = self.pid, error = %err, "failed to reap child on drop");
                    return;
                }
            }
        }
    }
}
