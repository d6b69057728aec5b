//! fork/exec backend

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus};

use nix::sys::signal::{kill, Signal as NixSignal};
use nix::unistd::Pid;
use tracing::debug;

use super::{ProcessBackend, SpawnRequest};
use crate::types::Signal;

pub(crate) struct PosixBackend;

impl ProcessBackend for PosixBackend {
    const NAME: &'static str = "posix";

    fn spawn(request: SpawnRequest<'_>) -> io::Result<Child> {
        let mut cmd = Command::new(request.program);
        if let Some((name, args)) = request.command.split_first() {
            cmd.arg0(name);
            cmd.args(args);
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

        if request.new_process_group {
            cmd.process_group(0);
        }

        // `cmd` drops here, closing the parent's copies of the child ends.
        cmd.spawn()
    }

    fn send_signal(child: &mut Child, signal: Signal) -> io::Result<()> {
        let pid = Pid::from_raw(child.id() as i32);
        debug!(pid = %pid, signal = %signal, "Sending signal");
        kill(pid, native_signal(signal)).map_err(io::Error::from)
    }

    fn signal_number(signal: Signal) -> i32 {
        native_signal(signal) as i32
    }

    fn exit_code(status: ExitStatus) -> i32 {
        match (status.code(), status.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => -signal,
            (None, None) => -1,
        }
    }
}

fn native_signal(signal: Signal) -> NixSignal {
    match signal {
        Signal::Hangup => NixSignal::SIGHUP,
        Signal::Interrupt => NixSignal::SIGINT,
        Signal::Quit => NixSignal::SIGQUIT,
        Signal::Illegal => NixSignal::SIGILL,
        Signal::Trap => NixSignal::SIGTRAP,
        Signal::Abort => NixSignal::SIGABRT,
        Signal::Bus => NixSignal::SIGBUS,
        Signal::FloatingPoint => NixSignal::SIGFPE,
        Signal::Kill => NixSignal::SIGKILL,
        Signal::User1 => NixSignal::SIGUSR1,
        Signal::Segv => NixSignal::SIGSEGV,
        Signal::User2 => NixSignal::SIGUSR2,
        Signal::Pipe => NixSignal::SIGPIPE,
        Signal::Alarm => NixSignal::SIGALRM,
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Child => NixSignal::SIGCHLD,
        Signal::Continue => NixSignal::SIGCONT,
        Signal::Stop => NixSignal::SIGSTOP,
        Signal::TerminalStop => NixSignal::SIGTSTP,
        Signal::TerminalInput => NixSignal::SIGTTIN,
        Signal::TerminalOutput => NixSignal::SIGTTOU,
        Signal::Urgent => NixSignal::SIGURG,
        Signal::CpuLimit => NixSignal::SIGXCPU,
        Signal::FileSizeLimit => NixSignal::SIGXFSZ,
        Signal::VirtualAlarm => NixSignal::SIGVTALRM,
        Signal::Profile => NixSignal::SIGPROF,
        Signal::WindowChange => NixSignal::SIGWINCH,
        Signal::Io => NixSignal::SIGIO,
    }
}
