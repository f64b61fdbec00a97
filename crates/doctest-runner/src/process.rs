//! Supervised subprocess execution.
//!
//! A child runs in its own process group (unix) so that everything it forks
//! can be torn down together. The group is killed on timeout, on
//! cancellation and after a normal exit, which also releases any pipe a
//! leftover background job would otherwise hold open.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::CancelToken;

/// How long to wait for output pipes to drain once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Why supervision ended.
#[derive(Debug)]
pub(crate) enum ProcessExit {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub exit: ProcessExit,
    pub stdout: String,
    pub stderr: String,
}

enum Wake {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawn `command` and wait for it under `timeout` and `cancel`.
///
/// The caller configures program, arguments and directories; this function
/// takes over stdio and process-group setup. Errors only on spawn or wait
/// failure.
pub(crate) async fn run_supervised(
    mut command: Command,
    timeout: Duration,
    cancel: &CancelToken,
) -> io::Result<ProcessOutput> {
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let pid = child.id();
    let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_all(pipe)));
    let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

    let wake = tokio::select! {
        status = child.wait() => Wake::Exited(status),
        _ = tokio::time::sleep(timeout) => Wake::TimedOut,
        _ = cancel.cancelled() => Wake::Cancelled,
    };

    let exit = match wake {
        Wake::Exited(status) => {
            let status = status?;
            kill_group(pid);
            ProcessExit::Exited(status)
        }
        Wake::TimedOut => {
            debug!(timeout_ms = timeout.as_millis() as u64, "child timed out");
            terminate(&mut child, pid).await;
            ProcessExit::TimedOut
        }
        Wake::Cancelled => {
            debug!("child cancelled");
            terminate(&mut child, pid).await;
            ProcessExit::Cancelled
        }
    };

    Ok(ProcessOutput {
        exit,
        stdout: drain(stdout).await,
        stderr: drain(stderr).await,
    })
}

/// Kill the whole group, then reap the direct child.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "child already gone");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap child");
    }
}

/// `pid` is the group id: children are spawned as group leaders.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

async fn read_all<R: AsyncRead + Unpin>(mut pipe: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "pipe read failed");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn drain(task: Option<JoinHandle<String>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "output reader failed");
            String::new()
        }
        Err(_) => {
            task.abort();
            warn!("output pipe still open after child exit, output truncated");
            String::new()
        }
    }
}
