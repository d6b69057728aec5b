//! Handle to a spawned child process

use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::{NativeBackend, ProcessBackend};
use crate::error::{Result, SubprocessError};
use crate::pipe::{self, PipeHandle};
use crate::run::RunOptions;
use crate::types::{CommandLine, Pid, Signal};

/// Upper bound on the sleep between liveness checks in [`Popen::wait_timeout`]
const MAX_POLL_DELAY: Duration = Duration::from_millis(50);

/// A spawned process and the parent-side ends of its pipes
///
/// `Popen` is move-only: it owns OS handles and cannot be cloned. A value
/// left behind by [`std::mem::take`] owns nothing, and every operation on
/// it is either a no-op or [`SubprocessError::NoProcess`].
///
/// Dropping a `Popen` reaps the child only if it has already exited. A child
/// still running at that point is left alone; call [`Popen::wait`] first to
/// collect it.
#[derive(Debug, Default)]
pub struct Popen {
    /// Write end of the child's stdin, when piped
    pub stdin: Option<PipeHandle>,
    /// Read end of the child's stdout, when piped
    pub stdout: Option<PipeHandle>,
    /// Read end of the child's stderr, when piped
    pub stderr: Option<PipeHandle>,
    child: Option<Child>,
    pid: Pid,
    returncode: Option<i32>,
    args: CommandLine,
}

impl Popen {
    /// Spawn `command`; unset stream policies inherit from the parent
    pub fn spawn(command: CommandLine, options: RunOptions) -> Result<Self> {
        options.into_builder(command, false).spawn()
    }

    pub(crate) fn from_child(
        child: Child,
        args: CommandLine,
        stdin: Option<PipeHandle>,
        stdout: Option<PipeHandle>,
        stderr: Option<PipeHandle>,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            pid: child.id(),
            child: Some(child),
            returncode: None,
            args,
        }
    }

    /// Process id, `0` when no process is owned
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Command used to spawn the process
    pub fn args(&self) -> &CommandLine {
        &self.args
    }

    /// Exit code once the process has been reaped
    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    /// Whether this value owns a process
    pub fn owns_process(&self) -> bool {
        self.child.is_some()
    }

    /// Check for exit without blocking
    pub fn poll(&mut self) -> Result<bool> {
        if self.returncode.is_some() {
            return Ok(true);
        }
        let child = self.child.as_mut().ok_or(SubprocessError::NoProcess)?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.record(status);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(SubprocessError::os("wait", e)),
        }
    }

    /// Block until the process exits
    pub fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.returncode {
            return Ok(code);
        }
        let child = self.child.as_mut().ok_or(SubprocessError::NoProcess)?;
        let status = child.wait().map_err(|e| SubprocessError::os("wait", e))?;
        Ok(self.record(status))
    }

    /// Block for at most `timeout`
    ///
    /// Returns `Ok(None)` when the deadline passes first. The process keeps
    /// running in that case; terminating it is up to the caller. A timeout
    /// too large to represent as a deadline waits without bound.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<i32>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait().map(Some);
        };
        let mut delay = Duration::from_millis(1);
        loop {
            if self.poll()? {
                return Ok(self.returncode);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(delay.min(deadline - now));
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }
    }

    /// Send `signal`; `Ok(false)` if the process already exited
    pub fn send_signal(&mut self, signal: Signal) -> Result<bool> {
        if self.child.is_none() || self.poll()? {
            return Ok(false);
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };
        NativeBackend::send_signal(child, signal)
            .map_err(|e| SubprocessError::os("send signal", e))?;
        Ok(true)
    }

    /// Ask the process to exit
    pub fn terminate(&mut self) -> Result<bool> {
        self.send_signal(Signal::Terminate)
    }

    /// Force the process to exit
    pub fn kill(&mut self) -> Result<bool> {
        self.send_signal(Signal::Kill)
    }

    /// Close the stdin pipe so the child sees end-of-stream
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Drain and close stdout instead of reading it
    pub fn ignore_stdout(&mut self) {
        if let Some(handle) = self.stdout.take() {
            pipe::ignore_and_close(handle);
        }
    }

    /// Drain and close stderr instead of reading it
    pub fn ignore_stderr(&mut self) {
        if let Some(handle) = self.stderr.take() {
            pipe::ignore_and_close(handle);
        }
    }

    pub fn ignore_output(&mut self) {
        self.ignore_stdout();
        self.ignore_stderr();
    }

    /// Close every pipe end still owned; safe to call repeatedly
    pub fn close(&mut self) {
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
    }

    fn record(&mut self, status: ExitStatus) -> i32 {
        let code = NativeBackend::exit_code(status);
        debug!(pid = self.pid, code, "Process exited");
        self.returncode = Some(code);
        code
    }
}

impl Drop for Popen {
    fn drop(&mut self) {
        if self.returncode.is_some() {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.record(status);
            }
            Ok(None) => debug!(pid = self.pid, "Dropped while still running"),
            Err(e) => warn!(pid = self.pid, error = %e, "Failed to reap on drop"),
        }
    }
}
