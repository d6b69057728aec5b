//! Error types for process execution

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::types::CommandLine;

/// Process execution errors
#[derive(Debug, Error)]
pub enum SubprocessError {
    /// The program could not be resolved through the executable search path
    #[error("command not found: {program}")]
    CommandNotFound { program: String },

    /// The platform process-creation call failed
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: CommandLine,
        #[source]
        source: io::Error,
    },

    /// The process did not exit before the configured timeout
    #[error("command {command:?} timed out after {timeout:?}")]
    TimeoutExpired {
        command: CommandLine,
        timeout: Duration,
        /// Standard output captured before termination
        stdout: String,
        /// Standard error captured before termination
        stderr: String,
    },

    /// The process exited non-zero and the caller asked for that to be an error
    #[error("command {command:?} returned non-zero exit status {returncode}")]
    CalledProcess {
        returncode: i32,
        command: CommandLine,
        stdout: String,
        stderr: String,
    },

    /// A pipe, handle or wait operation failed
    #[error("{operation} failed: {source}")]
    Os {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// Options that cannot describe a spawnable process
    #[error("invalid process configuration: {0}")]
    InvalidConfig(String),

    /// The handle does not own a process (default-constructed or taken from)
    #[error("popen does not own a process")]
    NoProcess,
}

impl SubprocessError {
    pub(crate) fn os(operation: &'static str, source: io::Error) -> Self {
        Self::Os { operation, source }
    }

    /// Returns `true` for [`SubprocessError::TimeoutExpired`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExpired { .. })
    }

    /// Returns `true` for [`SubprocessError::CommandNotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CommandNotFound { .. })
    }

    /// Exit code carried by a [`SubprocessError::CalledProcess`]
    pub fn returncode(&self) -> Option<i32> {
        match self {
            Self::CalledProcess { returncode, .. } => Some(*returncode),
            _ => None,
        }
    }
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, SubprocessError>;
