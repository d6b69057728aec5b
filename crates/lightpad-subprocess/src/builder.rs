//! Turns a command line plus stream policies into a running [`Popen`]

use std::env;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread;

use tracing::{debug, info};

use crate::backend::{NativeBackend, ProcessBackend, SpawnRequest};
use crate::error::{Result, SubprocessError};
use crate::pipe::{self, ParentStream, PipeHandle, PipePair};
use crate::popen::Popen;
use crate::types::{CommandLine, EnvMap, StreamPolicy};

/// Locate `program` on the parent's executable search path
///
/// Names containing a path separator are checked as given.
pub fn find_program(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Locate `program`, searching the replacement environment's `PATH` if it has one
fn find_program_for(program: &str, env: Option<&EnvMap>) -> Option<PathBuf> {
    let search_path = env.and_then(|env| {
        env.iter()
            .find(|(name, _)| {
                if cfg!(windows) {
                    name.eq_ignore_ascii_case("PATH")
                } else {
                    name.as_str() == "PATH"
                }
            })
            .map(|(_, value)| value)
    });
    match (search_path, env::current_dir()) {
        (Some(paths), Ok(cwd)) => which::which_in(program, Some(paths), cwd).ok(),
        _ => find_program(program),
    }
}

/// Describes a process to spawn
///
/// Streams default to inheriting the parent's; nothing happens until
/// [`ProcessBuilder::spawn`].
#[derive(Debug, Default)]
pub struct ProcessBuilder {
    pub command: CommandLine,
    pub stdin: StreamPolicy,
    pub stdout: StreamPolicy,
    pub stderr: StreamPolicy,
    pub new_process_group: bool,
    pub cwd: Option<PathBuf>,
    /// Replaces the inherited environment when non-empty
    pub env: Option<EnvMap>,
}

/// What happens to the parent-side end of a stream after spawn
#[derive(Debug)]
enum ParentEnd {
    None,
    Keep(PipeHandle),
    Feed(PipeHandle, Vec<u8>),
    Drain(PipeHandle),
}

/// Resolved destination of an output stream
#[derive(Debug)]
enum OutputTarget {
    Inherit(ParentStream),
    Handle(PipeHandle),
    /// Filled in from the other output stream once both are resolved
    Alias,
}

impl OutputTarget {
    fn duplicate(&self) -> Result<Self> {
        match self {
            Self::Inherit(stream) => Ok(Self::Handle(pipe::duplicate_parent(*stream)?)),
            Self::Handle(handle) => Ok(Self::Handle(handle.try_clone()?)),
            Self::Alias => Err(SubprocessError::InvalidConfig(
                "stdout and stderr cannot both be merged into each other".into(),
            )),
        }
    }

    fn into_stdio(self) -> Stdio {
        match self {
            Self::Handle(handle) => handle.into_stdio(),
            Self::Inherit(_) | Self::Alias => Stdio::inherit(),
        }
    }
}

impl ProcessBuilder {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn stdin(mut self, policy: impl Into<StreamPolicy>) -> Self {
        self.stdin = policy.into();
        self
    }

    pub fn stdout(mut self, policy: impl Into<StreamPolicy>) -> Self {
        self.stdout = policy.into();
        self
    }

    pub fn stderr(mut self, policy: impl Into<StreamPolicy>) -> Self {
        self.stderr = policy.into();
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, env: EnvMap) -> Self {
        self.env = Some(env);
        self
    }

    pub fn new_process_group(mut self, enabled: bool) -> Self {
        self.new_process_group = enabled;
        self
    }

    /// Start the process
    ///
    /// Pipes allocated here are released on every failure path before the
    /// error is returned.
    pub fn spawn(self) -> Result<Popen> {
        self.validate()?;

        // Resolve before allocating anything for the child.
        let env = self.env.as_ref().filter(|env| !env.is_empty());
        let program = &self.command[0];
        let resolved = find_program_for(program, env).ok_or_else(|| {
            debug!(program = %program, "Program not found on search path");
            SubprocessError::CommandNotFound {
                program: program.clone(),
            }
        })?;
        debug!(program = %program, resolved = %resolved.display(), "Resolved program");

        let (stdin, stdin_end) = resolve_input(self.stdin)?;
        let (stdout, stdout_end) = resolve_output(self.stdout, ParentStream::Stdout)?;
        let (stderr, stderr_end) = resolve_output(self.stderr, ParentStream::Stderr)?;
        let (stdout, stderr) = match (stdout, stderr) {
            (stdout, OutputTarget::Alias) => {
                let stderr = stdout.duplicate()?;
                (stdout, stderr)
            }
            (OutputTarget::Alias, stderr) => (stderr.duplicate()?, stderr),
            other => other,
        };

        let request = SpawnRequest {
            program: &resolved,
            command: &self.command,
            stdin,
            stdout: stdout.into_stdio(),
            stderr: stderr.into_stdio(),
            cwd: self.cwd.as_deref(),
            env,
            new_process_group: self.new_process_group,
        };
        let child = NativeBackend::spawn(request).map_err(|source| SubprocessError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        info!(
            pid = child.id(),
            program = %resolved.display(),
            backend = NativeBackend::NAME,
            "Process spawned"
        );

        let stdin = settle(stdin_end);
        let stdout = settle(stdout_end);
        let stderr = settle(stderr_end);
        Ok(Popen::from_child(child, self.command, stdin, stdout, stderr))
    }

    fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(SubprocessError::InvalidConfig("empty command line".into()));
        }
        let invalid = |msg: &str| Err(SubprocessError::InvalidConfig(msg.into()));
        match (&self.stdin, &self.stdout, &self.stderr) {
            (StreamPolicy::MergeIntoStdout | StreamPolicy::MergeIntoStderr, _, _) => {
                invalid("stdin cannot be merged into an output stream")
            }
            (_, StreamPolicy::Input(_), _) | (_, _, StreamPolicy::Input(_)) => {
                invalid("input data can only be fed to stdin")
            }
            (_, StreamPolicy::MergeIntoStdout, _) => invalid("stdout cannot be merged into itself"),
            (_, _, StreamPolicy::MergeIntoStderr) => invalid("stderr cannot be merged into itself"),
            (_, StreamPolicy::MergeIntoStderr, StreamPolicy::MergeIntoStdout) => {
                invalid("stdout and stderr cannot both be merged into each other")
            }
            _ => Ok(()),
        }
    }
}

fn resolve_input(policy: StreamPolicy) -> Result<(Stdio, ParentEnd)> {
    let resolved = match policy {
        StreamPolicy::Inherit => (Stdio::inherit(), ParentEnd::None),
        StreamPolicy::Handle(handle) => (handle.into_stdio(), ParentEnd::None),
        StreamPolicy::File(path) => {
            let file = File::open(&path).map_err(|e| SubprocessError::os("open stdin file", e))?;
            (Stdio::from(file), ParentEnd::None)
        }
        StreamPolicy::Pipe | StreamPolicy::Discard | StreamPolicy::Input(_) => {
            let mut pair = PipePair::create(false)?;
            let (child_end, parent_end) = (take_end(pair.take_read())?, take_end(pair.take_write())?);
            let parent_end = match policy {
                StreamPolicy::Pipe => ParentEnd::Keep(parent_end),
                StreamPolicy::Input(data) => ParentEnd::Feed(parent_end, data),
                // Dropping the write end gives the child immediate EOF.
                _ => ParentEnd::None,
            };
            (child_end.into_stdio(), parent_end)
        }
        StreamPolicy::MergeIntoStdout | StreamPolicy::MergeIntoStderr => {
            return Err(SubprocessError::InvalidConfig(
                "stdin cannot be merged into an output stream".into(),
            ))
        }
    };
    Ok(resolved)
}

fn resolve_output(policy: StreamPolicy, stream: ParentStream) -> Result<(OutputTarget, ParentEnd)> {
    let resolved = match policy {
        StreamPolicy::Inherit => (OutputTarget::Inherit(stream), ParentEnd::None),
        StreamPolicy::Handle(handle) => (OutputTarget::Handle(handle), ParentEnd::None),
        StreamPolicy::File(path) => (OutputTarget::Handle(create_file(&path)?), ParentEnd::None),
        StreamPolicy::Pipe | StreamPolicy::Discard => {
            let mut pair = PipePair::create(false)?;
            let (parent_end, child_end) = (take_end(pair.take_read())?, take_end(pair.take_write())?);
            let parent_end = match policy {
                StreamPolicy::Pipe => ParentEnd::Keep(parent_end),
                _ => ParentEnd::Drain(parent_end),
            };
            (OutputTarget::Handle(child_end), parent_end)
        }
        StreamPolicy::MergeIntoStdout | StreamPolicy::MergeIntoStderr => {
            (OutputTarget::Alias, ParentEnd::None)
        }
        StreamPolicy::Input(_) => {
            return Err(SubprocessError::InvalidConfig(
                "input data can only be fed to stdin".into(),
            ))
        }
    };
    Ok(resolved)
}

fn take_end(end: Option<PipeHandle>) -> Result<PipeHandle> {
    end.ok_or_else(|| SubprocessError::InvalidConfig("pipe end already taken".into()))
}

fn create_file(path: &Path) -> Result<PipeHandle> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map(PipeHandle::from)
        .map_err(|e| SubprocessError::os("open output file", e))
}

/// Hand the parent end to the `Popen`, a feeder thread, or a drain thread
fn settle(end: ParentEnd) -> Option<PipeHandle> {
    match end {
        ParentEnd::None => None,
        ParentEnd::Keep(handle) => Some(handle),
        ParentEnd::Drain(handle) => {
            pipe::ignore_and_close(handle);
            None
        }
        ParentEnd::Feed(handle, data) => {
            feed(handle, data);
            None
        }
    }
}

/// Write `data` to the child's stdin on a background thread, then close it
fn feed(mut handle: PipeHandle, data: Vec<u8>) {
    let spawned = thread::Builder::new()
        .name("stdin-feed".into())
        .spawn(move || {
            // A child that exits without reading everything is not an error.
            if let Err(e) = pipe::write_all(&mut handle, &data) {
                debug!(error = %e, "Stopped feeding stdin");
            }
        });
    if let Err(e) = spawned {
        debug!(error = %e, "Could not start stdin feeder, stdin closed instead");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_is_rejected() {
        let err = ProcessBuilder::default().spawn().unwrap_err();
        assert!(matches!(err, SubprocessError::InvalidConfig(_)));
    }

    #[test]
    fn test_conflicting_merges_are_rejected() {
        let err = ProcessBuilder::new(["true"])
            .stdout(StreamPolicy::MergeIntoStderr)
            .stderr(StreamPolicy::MergeIntoStdout)
            .spawn()
            .unwrap_err();
        assert!(matches!(err, SubprocessError::InvalidConfig(_)));

        let err = ProcessBuilder::new(["true"])
            .stdout(StreamPolicy::Input(b"x".to_vec()))
            .spawn()
            .unwrap_err();
        assert!(matches!(err, SubprocessError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let err = ProcessBuilder::new(["lightpad-no-such-program-xyz"])
            .stdout(StreamPolicy::Pipe)
            .spawn()
            .unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_find_program() {
        assert!(find_program("sh").is_some());
        assert!(find_program("lightpad-no-such-program-xyz").is_none());

        let mut env = EnvMap::new();
        env.insert("PATH".into(), "/nonexistent-dir".into());
        assert!(find_program_for("sh", Some(&env)).is_none());
        assert!(find_program_for("/bin/sh", Some(&env)).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_failure_in_missing_cwd() {
        let err = ProcessBuilder::new(["true"])
            .cwd("/nonexistent/lightpad/dir")
            .spawn()
            .unwrap_err();
        assert!(matches!(err, SubprocessError::Spawn { .. }), "unexpected error: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_stderr_merged_into_stdout_pipe() {
        let mut popen = ProcessBuilder::new(["sh", "-c", "echo out; echo err >&2"])
            .stdout(StreamPolicy::Pipe)
            .stderr(StreamPolicy::MergeIntoStdout)
            .spawn()
            .unwrap();
        assert!(popen.stderr.is_none());
        let out = pipe::read_all(popen.stdout.as_mut().unwrap()).unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "out\nerr\n");
        assert_eq!(popen.wait().unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_merged_into_stderr_pipe() {
        let mut popen = ProcessBuilder::new(["sh", "-c", "echo out"])
            .stdout(StreamPolicy::MergeIntoStderr)
            .stderr(StreamPolicy::Pipe)
            .spawn()
            .unwrap();
        assert!(popen.stdout.is_none());
        let err = pipe::read_all(popen.stderr.as_mut().unwrap()).unwrap();
        assert_eq!(err, b"out\n");
        popen.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_input_and_file_redirection() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.txt");
        let mut popen = ProcessBuilder::new(["cat"])
            .stdin("fed through stdin")
            .stdout(StreamPolicy::File(out_path.clone()))
            .spawn()
            .unwrap();
        assert!(popen.stdin.is_none());
        assert_eq!(popen.wait().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "fed through stdin");

        let mut popen = ProcessBuilder::new(["cat"])
            .stdin(StreamPolicy::File(out_path))
            .stdout(StreamPolicy::Pipe)
            .spawn()
            .unwrap();
        let out = pipe::read_all(popen.stdout.as_mut().unwrap()).unwrap();
        assert_eq!(out, b"fed through stdin");
        popen.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_discard_policies() {
        let mut popen = ProcessBuilder::new(["sh", "-c", "cat; head -c 500000 /dev/zero"])
            .stdin(StreamPolicy::Discard)
            .stdout(StreamPolicy::Discard)
            .spawn()
            .unwrap();
        assert!(popen.stdin.is_none() && popen.stdout.is_none());
        assert_eq!(popen.wait().unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_caller_handle_redirect() {
        let mut pair = PipePair::create(false).unwrap();
        let mut popen = ProcessBuilder::new(["echo", "via handle"])
            .stdout(pair.take_write().unwrap())
            .spawn()
            .unwrap();
        popen.wait().unwrap();
        let out = pipe::read_all(&mut pair.take_read().unwrap()).unwrap();
        assert_eq!(out, b"via handle\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut popen = ProcessBuilder::new(["pwd"])
            .cwd(dir.path())
            .stdout(StreamPolicy::Pipe)
            .spawn()
            .unwrap();
        let out = pipe::read_all(popen.stdout.as_mut().unwrap()).unwrap();
        let printed = PathBuf::from(String::from_utf8_lossy(&out).trim_end());
        assert_eq!(
            printed.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        popen.wait().unwrap();
    }
}
