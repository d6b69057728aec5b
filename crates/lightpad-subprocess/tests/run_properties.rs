//! End-to-end behavior of the run facade and the process handle on POSIX hosts

#![cfg(unix)]

use std::io::Write;
use std::thread;
use std::time::Duration;

use lightpad_subprocess::{
    pipe, run, EnvMap, Popen, RunBuilder, RunOptions, StreamPolicy, SubprocessError,
};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{getpgid, Pid};

#[test]
fn test_fixed_output_is_captured() {
    let completed = run(["echo", "hello lightpad"], RunOptions::default()).unwrap();
    assert_eq!(completed.stdout, "hello lightpad\n");
    assert_eq!(completed.stderr, "");
    assert_eq!(completed.returncode, 0);
    assert!(bool::from(&completed));
    assert_eq!(completed.args, vec!["echo", "hello lightpad"]);
}

#[test]
fn test_missing_program_is_command_not_found() {
    for program in ["lightpad-definitely-missing", "/nonexistent/bin/lightpad"] {
        let err = run([program], RunOptions::default()).unwrap_err();
        assert!(
            matches!(err, SubprocessError::CommandNotFound { ref program } if !program.is_empty()),
            "unexpected error for {program}: {err:?}"
        );
    }
}

#[test]
fn test_nonzero_exit_policy() {
    let err = RunBuilder::new(["sh", "-c", "echo partial; exit 7"])
        .check(true)
        .run()
        .unwrap_err();
    match err {
        SubprocessError::CalledProcess {
            returncode, stdout, ..
        } => {
            assert_eq!(returncode, 7);
            assert_eq!(stdout, "partial\n");
        }
        other => panic!("unexpected: {other:?}"),
    }

    let completed = RunBuilder::new(["sh", "-c", "exit 7"]).run().unwrap();
    assert_eq!(completed.returncode, 7);
    assert!(!bool::from(&completed));
}

#[test]
fn test_timeout_kills_the_process() {
    let err = RunBuilder::new(["sh", "-c", "echo $$; exec sleep 30"])
        .timeout(Duration::from_millis(400))
        .run()
        .unwrap_err();
    let SubprocessError::TimeoutExpired { stdout, timeout, .. } = err else {
        panic!("expected a timeout, got {err:?}");
    };
    assert_eq!(timeout, Duration::from_millis(400));

    let pid: i32 = stdout.trim().parse().unwrap();
    assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
}

#[test]
fn test_stdin_round_trip_larger_than_pipe_buffer() {
    let data: Vec<u8> = (0..8 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();

    let mut popen = RunBuilder::new(["cat"])
        .stdin(StreamPolicy::Pipe)
        .stdout(StreamPolicy::Pipe)
        .popen()
        .unwrap();
    let mut stdin = popen.stdin.take().unwrap();
    let expected = data.clone();
    let writer = thread::spawn(move || {
        stdin.write_all(&data).unwrap();
    });
    let echoed = pipe::read_all(popen.stdout.as_mut().unwrap()).unwrap();
    writer.join().unwrap();

    assert_eq!(echoed.len(), expected.len());
    assert!(echoed == expected);
    assert_eq!(popen.wait().unwrap(), 0);
}

#[test]
fn test_input_data_round_trip_through_run() {
    let text = "lightpad\n".repeat(400_000);
    let completed = RunBuilder::new(["cat"]).stdin(text.as_str()).run().unwrap();
    assert_eq!(completed.stdout.len(), text.len());
    assert!(completed.stdout == text);
}

#[test]
fn test_both_streams_flooded_do_not_deadlock() {
    let script = "head -c 2000000 /dev/zero | tr '\\0' a; head -c 2000000 /dev/zero | tr '\\0' b >&2";
    let completed = RunBuilder::new(["sh", "-c", script])
        .timeout(Duration::from_secs(60))
        .run()
        .unwrap();
    assert_eq!(completed.stdout.len(), 2_000_000);
    assert_eq!(completed.stderr.len(), 2_000_000);
    assert!(completed.stdout.bytes().all(|b| b == b'a'));
    assert!(completed.stderr.bytes().all(|b| b == b'b'));
}

#[test]
fn test_close_twice_and_terminate_after_exit() {
    let mut popen = RunBuilder::new(["echo", "done"])
        .stdout(StreamPolicy::Pipe)
        .popen()
        .unwrap();
    assert_eq!(popen.wait().unwrap(), 0);
    popen.close();
    popen.close();
    assert!(popen.stdout.is_none());
    assert!(!popen.terminate().unwrap());
    assert!(!popen.kill().unwrap());
}

#[test]
fn test_moved_from_popen_owns_nothing() {
    let mut popen = RunBuilder::new(["cat"])
        .stdin(StreamPolicy::Pipe)
        .stdout(StreamPolicy::Pipe)
        .popen()
        .unwrap();
    let pid = popen.pid();

    let mut moved: Popen = std::mem::take(&mut popen);
    assert!(!popen.owns_process());
    assert!(popen.stdin.is_none() && popen.stdout.is_none());
    assert_eq!(popen.pid(), 0);
    popen.close();
    assert!(!popen.kill().unwrap());

    assert_eq!(moved.pid(), pid);
    moved.close_stdin();
    assert_eq!(pipe::read_all(moved.stdout.as_mut().unwrap()).unwrap(), b"");
    assert_eq!(moved.wait().unwrap(), 0);
}

#[test]
fn test_replacement_environment_is_exact() {
    let mut env = EnvMap::new();
    env.insert("LIGHTPAD_ONLY".into(), "1".into());
    let completed = RunBuilder::new(["env"]).env(env).run().unwrap();
    assert_eq!(completed.stdout, "LIGHTPAD_ONLY=1\n");
}

#[test]
fn test_empty_environment_inherits() {
    let completed = RunBuilder::new(["env"]).env(EnvMap::new()).run().unwrap();
    assert!(completed.stdout.lines().any(|line| line.starts_with("PATH=")));
}

#[test]
fn test_new_process_group() {
    let mut popen = RunBuilder::new(["sleep", "5"])
        .new_process_group(true)
        .popen()
        .unwrap();
    let pid = Pid::from_raw(popen.pid() as i32);
    assert_eq!(getpgid(Some(pid)).unwrap(), pid);
    assert!(popen.kill().unwrap());
    assert_eq!(popen.wait().unwrap(), -9);
}

#[test]
fn test_send_signal_exit_code() {
    let mut popen = RunBuilder::new(["sleep", "5"]).popen().unwrap();
    assert!(popen
        .send_signal(lightpad_subprocess::Signal::Hangup)
        .unwrap());
    assert_eq!(popen.wait().unwrap(), -1);
}
