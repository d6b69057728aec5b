//! Platform process backends
//!
//! Everything above this module talks to [`NativeBackend`] through the
//! [`ProcessBackend`] trait; the implementation is picked at build time.

use std::io;
use std::path::Path;
use std::process::{Child, ExitStatus, Stdio};

use crate::types::{EnvMap, Signal};

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use posix::PosixBackend as NativeBackend;
#[cfg(windows)]
pub(crate) use windows::WindowsBackend as NativeBackend;

/// Fully resolved input to a platform spawn call
#[derive(Debug)]
pub(crate) struct SpawnRequest<'a> {
    /// Resolved executable path
    pub program: &'a Path,
    /// Original command line; element 0 is what the child sees as its name
    pub command: &'a [String],
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
    pub cwd: Option<&'a Path>,
    /// Replacement environment; `None` inherits the parent's
    pub env: Option<&'a EnvMap>,
    pub new_process_group: bool,
}

/// Spawn, signal and exit-status decoding for one host process model
pub(crate) trait ProcessBackend {
    /// Short name used in logs
    const NAME: &'static str;

    /// Start the child; the request's stdio handles are consumed and the
    /// parent's copies of them are closed when this returns
    fn spawn(request: SpawnRequest<'_>) -> io::Result<Child>;

    /// Deliver `signal` to a child that has not been reaped yet
    fn send_signal(child: &mut Child, signal: Signal) -> io::Result<()>;

    /// Host number of `signal`
    fn signal_number(signal: Signal) -> i32;

    /// Collapse a platform exit status into a single integer code
    fn exit_code(status: ExitStatus) -> i32;
}
