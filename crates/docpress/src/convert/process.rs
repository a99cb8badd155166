use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::error::ProcessError;
use crate::queue::Deadline;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for stderr to close once the process group is gone.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Stderr kept for error messages.
const STDERR_LIMIT: usize = 4096;

/// Runs `command` to completion, killing it once `deadline` passes.
///
/// On unix the child leads its own process group. Launcher scripts such as
/// `xvfb-run` or `soffice` fork the process doing the work, so the whole group
/// is killed on timeout, and stragglers are reaped once the launcher exits.
///
/// Stdout is discarded; stderr is captured and attached to failures.
pub fn run_to_completion(mut command: Command, deadline: &Deadline) -> Result<(), ProcessError> {
    let program = command.get_program().to_string_lossy().to_string();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    tracing::debug!(program = %program, "Spawning external process");

    let mut child = command.spawn().map_err(|e| ProcessError::Spawn {
        program: program.clone(),
        source: e,
    })?;

    let (stderr_tx, stderr_rx) = crossbeam_channel::bounded::<Vec<u8>>(1);
    if let Some(mut stderr) = child.stderr.take() {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            let _ = stderr_tx.send(buf);
        });
    }

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if kill_process_group(&child) {
                    tracing::debug!(program = %program, "Killed leftover processes");
                }
                let stderr = match stderr_rx.recv_timeout(STDERR_GRACE) {
                    Ok(buf) => tail_lossy(&buf),
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::warn!(program = %program, "Stderr still open after exit");
                        String::new()
                    }
                    Err(RecvTimeoutError::Disconnected) => String::new(),
                };

                if status.success() {
                    return Ok(());
                }
                return Err(ProcessError::Failed {
                    program,
                    status,
                    stderr,
                });
            }
            Ok(None) => {
                if deadline.is_expired() {
                    kill_process_group(&child);
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(program = %program, "Killed external process after deadline");
                    return Err(ProcessError::TimedOut {
                        program,
                        elapsed: deadline.elapsed(),
                    });
                }
                let pause = deadline
                    .remaining()
                    .map_or(POLL_INTERVAL, |left| left.min(POLL_INTERVAL));
                thread::sleep(pause);
            }
            Err(e) => {
                kill_process_group(&child);
                let _ = child.kill();
                return Err(ProcessError::Wait { program, source: e });
            }
        }
    }
}

/// Sends SIGKILL to the child's process group. Returns whether any process
/// was signalled.
#[cfg(unix)]
fn kill_process_group(child: &Child) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return false;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    unsafe { libc::kill(-pgid, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) -> bool {
    false
}

fn tail_lossy(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(STDERR_LIMIT);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}
