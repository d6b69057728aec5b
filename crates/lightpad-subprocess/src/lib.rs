//! # lightpad-subprocess
//!
//! **Purpose**: Child process execution for the Lightpad editor
//!
//! Spawns programs with each standard stream inherited, piped, redirected
//! or discarded, waits for them with an optional timeout, and hands back
//! the exit code and captured text.
//!
//! ## Features
//!
//! - **Stream Policies**: inherit, pipe, discard, file, caller handle,
//!   stdin data, and stdout/stderr merging
//! - **Process Handle**: move-only [`Popen`] with poll/wait/signal/close
//! - **Captured Runs**: [`run`] drains both output pipes concurrently, so
//!   chatty children cannot deadlock
//! - **Timeouts**: expired runs are terminated and report partial output
//! - **Typed Errors**: not-found, spawn, timeout, non-zero exit and OS
//!   failures are distinct [`SubprocessError`] variants
//! - **Scoped Environment**: [`env::EnvGuard`] and [`env::CwdGuard`]
//!   restore process-wide state on drop
//! - **Two Backends**: fork/exec on Unix, CreateProcess on Windows
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use lightpad_subprocess::{RunBuilder, SubprocessError};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! match RunBuilder::new(["python3", "script.py"])
//!     .timeout(Duration::from_secs(10))
//!     .run()
//! {
//!     Ok(completed) => println!("exit {}: {}", completed.returncode, completed.stdout),
//!     Err(SubprocessError::TimeoutExpired { stdout, .. }) => println!("partial: {stdout}"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

mod backend;
pub mod builder;
pub mod codec;
pub mod env;
pub mod error;
pub mod pipe;
pub mod popen;
pub mod run;
pub mod types;

pub use builder::{find_program, ProcessBuilder};
pub use error::{Result, SubprocessError};
pub use pipe::{PipeHandle, PipePair};
pub use popen::Popen;
#[cfg(feature = "tokio")]
pub use run::run_async;
pub use run::{run, run_popen, RunBuilder, RunOptions};
pub use types::{CommandLine, CompletedProcess, EnvMap, Pid, Signal, StreamPolicy};
