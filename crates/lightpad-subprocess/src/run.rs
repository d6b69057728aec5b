//! Spawn, capture and wait in one call

use std::path::PathBuf;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::builder::ProcessBuilder;
use crate::error::{Result, SubprocessError};
use crate::pipe::{self, PipeHandle};
use crate::popen::Popen;
use crate::types::{CommandLine, CompletedProcess, EnvMap, StreamPolicy};

/// How long a terminated process gets to exit before it is killed
const KILL_GRACE: Duration = Duration::from_millis(200);

/// Options for [`run`] and [`Popen::spawn`]
///
/// Unset stream policies take the entry point's default: [`run`] pipes
/// stdout and stderr, [`Popen::spawn`] inherits everything. `check` and
/// `timeout` only apply to [`run`].
#[derive(Debug, Default)]
pub struct RunOptions {
    /// Turn a non-zero exit into [`SubprocessError::CalledProcess`]
    pub check: bool,
    pub stdin: Option<StreamPolicy>,
    pub stdout: Option<StreamPolicy>,
    pub stderr: Option<StreamPolicy>,
    pub new_process_group: bool,
    /// Must name an existing directory when the process is spawned
    pub cwd: Option<PathBuf>,
    /// Replaces the inherited environment when non-empty
    pub env: Option<EnvMap>,
    /// Unset waits forever
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub(crate) fn into_builder(self, command: CommandLine, capture: bool) -> ProcessBuilder {
        let output_default = || {
            if capture {
                StreamPolicy::Pipe
            } else {
                StreamPolicy::Inherit
            }
        };
        ProcessBuilder {
            command,
            stdin: self.stdin.unwrap_or_default(),
            stdout: self.stdout.unwrap_or_else(output_default),
            stderr: self.stderr.unwrap_or_else(output_default),
            new_process_group: self.new_process_group,
            cwd: self.cwd,
            env: self.env,
        }
    }
}

/// Run a command to completion and capture its output
///
/// Both output pipes are drained on their own threads while the process
/// runs, so a child filling both buffers cannot deadlock. On timeout the
/// process is terminated (then killed if it lingers) and
/// [`SubprocessError::TimeoutExpired`] carries whatever was captured.
///
/// # Examples
/// ```no_run
/// use lightpad_subprocess::{run, RunOptions};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let completed = run(["echo", "hello"], RunOptions::default())?;
/// assert!(completed.success());
/// assert_eq!(completed.stdout, "hello\n");
/// # Ok(())
/// # }
/// ```
pub fn run<I, S>(command: I, options: RunOptions) -> Result<CompletedProcess>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let command: CommandLine = command.into_iter().map(Into::into).collect();
    debug!(command = ?command, timeout = ?options.timeout, "Running command");

    let check = options.check;
    let timeout = options.timeout;
    let popen = options.into_builder(command, true).spawn()?;
    communicate(popen, timeout, check)
}

/// Capture and wait on a process that is already running
///
/// Any stdin pipe still held by `popen` is closed first.
pub fn run_popen(popen: Popen, check: bool) -> Result<CompletedProcess> {
    communicate(popen, None, check)
}

/// Run on tokio's blocking pool, for callers on an async runtime
#[cfg(feature = "tokio")]
pub async fn run_async(command: CommandLine, options: RunOptions) -> Result<CompletedProcess> {
    tokio::task::spawn_blocking(move || run(command, options))
        .await
        .map_err(|e| {
            SubprocessError::os(
                "join blocking run",
                std::io::Error::new(std::io::ErrorKind::Other, e),
            )
        })?
}

enum Outcome {
    Exited(i32),
    TimedOut(Duration),
}

fn communicate(
    mut popen: Popen,
    timeout: Option<Duration>,
    check: bool,
) -> Result<CompletedProcess> {
    popen.close_stdin();
    let stdout = popen.stdout.take();
    let stderr = popen.stderr.take();

    let (outcome, stdout, stderr) = thread::scope(|scope| {
        let stdout = stdout.map(|handle| scope.spawn(move || drain(handle)));
        let stderr = stderr.map(|handle| scope.spawn(move || drain(handle)));

        let outcome = wait_or_stop(&mut popen, timeout);
        if outcome.is_err() {
            force_stop(&mut popen);
        }
        // Readers finish only after the child is gone and EOF is observed.
        (outcome, join_reader(stdout), join_reader(stderr))
    });

    let outcome = outcome?;
    let (stdout, stderr) = (stdout?, stderr?);
    match outcome {
        Outcome::TimedOut(timeout) => Err(SubprocessError::TimeoutExpired {
            command: popen.args().clone(),
            timeout,
            stdout,
            stderr,
        }),
        Outcome::Exited(returncode) => {
            let completed = CompletedProcess {
                args: popen.args().clone(),
                returncode,
                stdout,
                stderr,
            };
            if check {
                completed.check()
            } else {
                Ok(completed)
            }
        }
    }
}

fn drain(mut handle: PipeHandle) -> Result<Vec<u8>> {
    pipe::read_all(&mut handle)
}

fn join_reader(reader: Option<ScopedJoinHandle<'_, Result<Vec<u8>>>>) -> Result<String> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    match reader.join() {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes?).into_owned()),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

fn wait_or_stop(popen: &mut Popen, timeout: Option<Duration>) -> Result<Outcome> {
    let Some(timeout) = timeout else {
        return popen.wait().map(Outcome::Exited);
    };
    if let Some(code) = popen.wait_timeout(timeout)? {
        return Ok(Outcome::Exited(code));
    }

    warn!(pid = popen.pid(), timeout = ?timeout, "Command timed out, terminating");
    popen.terminate()?;
    if popen.wait_timeout(KILL_GRACE)?.is_none() {
        debug!(pid = popen.pid(), "Still running after terminate, killing");
        popen.kill()?;
        popen.wait()?;
    }
    Ok(Outcome::TimedOut(timeout))
}

/// Best-effort kill and reap after a failed wait, so readers see EOF
fn force_stop(popen: &mut Popen) {
    if let Err(e) = popen.kill().and_then(|_| popen.wait()) {
        warn!(pid = popen.pid(), error = %e, "Failed to stop process after wait error");
    }
}

/// Chained setters over [`RunOptions`]
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
/// use lightpad_subprocess::RunBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let completed = RunBuilder::new(["cargo", "build"])
///     .cwd("/path/to/project")
///     .timeout(Duration::from_secs(300))
///     .check(true)
///     .run()?;
/// println!("{}", completed.stderr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RunBuilder {
    command: CommandLine,
    options: RunOptions,
}

impl RunBuilder {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            options: RunOptions::default(),
        }
    }

    pub fn check(mut self, check: bool) -> Self {
        self.options.check = check;
        self
    }

    pub fn stdin(mut self, policy: impl Into<StreamPolicy>) -> Self {
        self.options.stdin = Some(policy.into());
        self
    }

    pub fn stdout(mut self, policy: impl Into<StreamPolicy>) -> Self {
        self.options.stdout = Some(policy.into());
        self
    }

    pub fn stderr(mut self, policy: impl Into<StreamPolicy>) -> Self {
        self.options.stderr = Some(policy.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, env: EnvMap) -> Self {
        self.options.env = Some(env);
        self
    }

    /// Add one variable to the replacement environment
    pub fn env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options
            .env
            .get_or_insert_with(EnvMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn new_process_group(mut self, enabled: bool) -> Self {
        self.options.new_process_group = enabled;
        self
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn into_options(self) -> RunOptions {
        self.options
    }

    pub fn run(self) -> Result<CompletedProcess> {
        run(self.command, self.options)
    }

    pub fn popen(self) -> Result<Popen> {
        Popen::spawn(self.command, self.options)
    }
}

impl From<RunBuilder> for RunOptions {
    fn from(builder: RunBuilder) -> Self {
        builder.options
    }
}
