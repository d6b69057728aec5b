//! Vocabulary shared by the builder, the process handle and the run facade

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::backend::{NativeBackend, ProcessBackend};
use crate::error::{Result, SubprocessError};
use crate::pipe::PipeHandle;

/// Program followed by its arguments, passed verbatim (no shell)
pub type CommandLine = Vec<String>;

/// Replacement environment for a child process
pub type EnvMap = BTreeMap<String, String>;

/// OS process identifier
pub type Pid = u32;

/// Where one standard stream of the child comes from or goes to
#[derive(Debug, Default)]
pub enum StreamPolicy {
    /// Use the parent's own stream
    #[default]
    Inherit,
    /// Create a pipe and hand the parent-side end to the caller
    Pipe,
    /// Create a pipe whose parent-side end is never exposed
    ///
    /// For stdin the child reads end-of-stream immediately; for output
    /// streams whatever the child writes is drained and dropped.
    Discard,
    /// Redirect to a caller-owned handle
    Handle(PipeHandle),
    /// Redirect to a file (read for stdin, created/truncated otherwise)
    File(PathBuf),
    /// Feed these bytes to stdin, then close it (stdin only)
    Input(Vec<u8>),
    /// Send stderr wherever stdout goes (stderr only)
    MergeIntoStdout,
    /// Send stdout wherever stderr goes (stdout only)
    MergeIntoStderr,
}

impl StreamPolicy {
    /// Whether the policy produces a parent-side end kept on the `Popen`
    pub fn keeps_pipe(&self) -> bool {
        matches!(self, Self::Pipe | Self::Input(_))
    }
}

impl From<PipeHandle> for StreamPolicy {
    fn from(handle: PipeHandle) -> Self {
        Self::Handle(handle)
    }
}

impl From<Vec<u8>> for StreamPolicy {
    fn from(data: Vec<u8>) -> Self {
        Self::Input(data)
    }
}

impl From<&str> for StreamPolicy {
    fn from(data: &str) -> Self {
        Self::Input(data.as_bytes().to_vec())
    }
}

/// Signals understood by [`crate::Popen::send_signal`]
///
/// Discriminants follow the Linux numbering; [`Signal::number`] gives the
/// number the host actually delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Signal {
    Hangup = 1,
    Interrupt = 2,
    Quit = 3,
    Illegal = 4,
    Trap = 5,
    Abort = 6,
    Bus = 7,
    FloatingPoint = 8,
    Kill = 9,
    User1 = 10,
    Segv = 11,
    User2 = 12,
    Pipe = 13,
    Alarm = 14,
    Terminate = 15,
    Child = 17,
    Continue = 18,
    Stop = 19,
    TerminalStop = 20,
    TerminalInput = 21,
    TerminalOutput = 22,
    Urgent = 23,
    CpuLimit = 24,
    FileSizeLimit = 25,
    VirtualAlarm = 26,
    Profile = 27,
    WindowChange = 28,
    Io = 29,
}

impl Signal {
    /// Signal number on the current host
    pub fn number(self) -> i32 {
        NativeBackend::signal_number(self)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.number())
    }
}

/// Result of a process that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletedProcess {
    /// Command that was run
    pub args: CommandLine,
    /// Exit code; negated signal number when killed by a signal on POSIX
    pub returncode: i32,
    /// Captured standard output (empty when not piped)
    pub stdout: String,
    /// Captured standard error (empty when not piped)
    pub stderr: String,
}

impl CompletedProcess {
    /// `true` iff the exit code is zero
    pub fn success(&self) -> bool {
        self.returncode == 0
    }

    /// Turn a non-zero exit into [`SubprocessError::CalledProcess`]
    pub fn check(self) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(SubprocessError::CalledProcess {
            returncode: self.returncode,
            command: self.args,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

impl From<&CompletedProcess> for bool {
    fn from(completed: &CompletedProcess) -> bool {
        completed.success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(returncode: i32) -> CompletedProcess {
        CompletedProcess {
            args: vec!["true".into()],
            returncode,
            stdout: "out".into(),
            stderr: "err".into(),
        }
    }

    #[test]
    fn test_bool_conversion() {
        assert!(bool::from(&completed(0)));
        assert!(!bool::from(&completed(7)));
        assert!(!bool::from(&completed(-9)));
    }

    #[test]
    fn test_check_carries_output() {
        assert!(completed(0).check().is_ok());
        match completed(3).check() {
            Err(SubprocessError::CalledProcess {
                returncode, stdout, stderr, ..
            }) => {
                assert_eq!(returncode, 3);
                assert_eq!(stdout, "out");
                assert_eq!(stderr, "err");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_policy_conversions() {
        assert!(matches!(StreamPolicy::from("abc"), StreamPolicy::Input(ref d) if d == b"abc"));
        assert!(StreamPolicy::Pipe.keeps_pipe());
        assert!(!StreamPolicy::Discard.keeps_pipe());
        assert!(matches!(StreamPolicy::default(), StreamPolicy::Inherit));
    }

    #[test]
    fn test_signal_numbers() {
        assert_eq!(Signal::Kill.number(), 9);
        assert_eq!(Signal::Terminate.number(), 15);
        assert_eq!(Signal::Interrupt.to_string(), "Interrupt(2)");
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_numbers_follow_host() {
        use nix::sys::signal::Signal as NixSignal;

        assert_eq!(Signal::User1.number(), NixSignal::SIGUSR1 as i32);
        assert_eq!(Signal::Child.number(), NixSignal::SIGCHLD as i32);
        assert_eq!(Signal::Urgent.number(), NixSignal::SIGURG as i32);
    }
}
