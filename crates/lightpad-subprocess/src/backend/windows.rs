//! CreateProcess backend

use std::io;
use std::os::windows::process::CommandExt;
use std::process::{Child, Command, ExitStatus};

use tracing::debug;

use super::{ProcessBackend, SpawnRequest};
use crate::codec;
use crate::types::Signal;

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
const CREATE_UNICODE_ENVIRONMENT: u32 = 0x0000_0400;

pub(crate) struct WindowsBackend;

impl ProcessBackend for WindowsBackend {
    const NAME: &'static str = "windows";

    fn spawn(request: SpawnRequest<'_>) -> io::Result<Child> {
        let mut cmd = Command::new(request.program);
        // Quote ourselves so the child's argv matches the command exactly.
        if let Some((_, args)) = request.command.split_first() {
            if !args.is_empty() {
                cmd.raw_arg(codec::windows_args(args));
            }
        }

        cmd.stdin(request.stdin);
        cmd.stdout(request.stdout);
        cmd.stderr(request.stderr);

        if let Some(cwd) = request.cwd {
            cmd.current_dir(cwd);
        }

        if let Some(env) = request.env {
            cmd.env_clear();
            cmd.envs(env);
        }

        let mut flags = CREATE_UNICODE_ENVIRONMENT;
        if request.new_process_group {
            flags |= CREATE_NEW_PROCESS_GROUP;
        }
        cmd.creation_flags(flags);

        cmd.spawn()
    }

    fn send_signal(child: &mut Child, signal: Signal) -> io::Result<()> {
        debug!(pid = child.id(), signal = %signal, "Sending signal");
        match signal {
            Signal::Kill | Signal::Terminate => child.kill(),
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("signal {other} cannot be delivered on this platform"),
            )),
        }
    }

    fn signal_number(signal: Signal) -> i32 {
        signal as i32
    }

    fn exit_code(status: ExitStatus) -> i32 {
        status.code().unwrap_or(-1)
    }
}
