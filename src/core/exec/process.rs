//! Spawn a child with captured output and a wall-clock deadline.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result, TargetDetails, TransportDetails};
use crate::exec::CommandResult;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run `cmd` to completion or until `timeout` elapses.
///
/// The child gets its own session, so it has no controlling terminal and
/// cannot prompt the operator. On timeout the whole process group is
/// killed and `command.timeout` is returned.
pub fn run_captured(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    display: &str,
    target: &TargetDetails,
) -> Result<CommandResult> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    detach_from_terminal(&mut cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::command_spawn_failed(e.to_string(), transport(display, target, None)))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            if let Err(e) = pipe.write_all(input) {
                if e.kind() != ErrorKind::BrokenPipe {
                    kill_group(&mut child);
                    return Err(Error::command_spawn_failed(
                        e.to_string(),
                        transport(display, target, None),
                    ));
                }
            }
        }
    }

    let status = wait_with_deadline(&mut child, timeout)
        .map_err(|e| Error::command_spawn_failed(e.to_string(), transport(display, target, None)))?;

    let Some(status) = status else {
        kill_group(&mut child);
        return Err(Error::command_timeout(transport(
            display,
            target,
            Some(timeout.as_secs()),
        )));
    };

    Ok(CommandResult {
        exit_code: exit_code(status),
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Exit code, or 128 + signal for signal-terminated children (shell convention).
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

fn detach_from_terminal(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: setsid is async-signal-safe and touches no Rust state.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

fn kill_group(child: &mut Child) {
    let pid = child.id() as libc::pid_t;
    // SAFETY: signalling our own child's process group.
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn transport(display: &str, target: &TargetDetails, timeout_secs: Option<u64>) -> TransportDetails {
    TransportDetails {
        command: display.to_string(),
        target: target.clone(),
        timeout_secs,
        error: None,
    }
}
