//! rsync transfer engine.
//!
//! Runs `rsync -aAXHv --delete` with `--link-dest` pointing at the reference
//! snapshot, so unchanged files become hardlinks and deletions on the source
//! are mirrored. rsync's output is streamed into the log.

use super::{TransferOutcome, TransferRequest, TreeTransferer};
use crate::{BackupError, Result};
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Archive mode with ACLs, xattrs and hardlinks, verbose, mirror deletions.
const BASE_ARGS: &[&str] = &["-aAXHv", "--delete"];

/// stderr lines kept for the error message.
const DIAGNOSTIC_LINES: usize = 5;

/// Grace period between SIGTERM and SIGKILL on cancellation.
const TERMINATE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RsyncTransferer {
    rsync_path: String,
    /// Remote shell passed with `-e`, when not plain `ssh`.
    remote_shell: Option<String>,
    extra_args: Vec<String>,
}

impl RsyncTransferer {
    pub fn new(rsync_path: impl Into<String>) -> Self {
        Self {
            rsync_path: rsync_path.into(),
            remote_shell: None,
            extra_args: Vec::new(),
        }
    }

    pub fn with_remote_shell(mut self, remote_shell: Option<String>) -> Self {
        self.remote_shell = remote_shell;
        self
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    /// Command line (without the program) for a request.
    pub fn build_args(&self, request: &TransferRequest) -> Vec<String> {
        let mut args: Vec<String> = BASE_ARGS.iter().map(|s| s.to_string()).collect();

        for pattern in &request.excludes {
            args.push(format!("--exclude={pattern}"));
        }
        for name in &request.protect {
            args.push(format!("--filter=P /{name}"));
        }
        if let Some(reference) = &request.reference {
            args.push(format!("--link-dest={}", reference.display()));
        }
        if let Some(shell) = &self.remote_shell {
            args.push("-e".to_string());
            args.push(shell.clone());
        }
        args.extend(self.extra_args.iter().cloned());

        args.push(request.source.clone());
        args.push(request.destination.display().to_string());
        args
    }
}

impl TreeTransferer for RsyncTransferer {
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome> {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let args = self.build_args(request);
        info!(
            source = %request.source,
            destination = %request.destination.display(),
            reference = ?request.reference,
            "Launching rsync"
        );
        debug!(program = %self.rsync_path, ?args, "rsync command line");

        let mut child = Command::new(&self.rsync_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackupError::Transfer {
                destination: request.destination.clone(),
                reason: format!("failed to launch {}: {}", self.rsync_path, e),
            })?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain_lines(out, false, 2)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain_lines(err, true, DIAGNOSTIC_LINES)));

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| BackupError::Transfer {
                destination: request.destination.clone(),
                reason: format!("failed to wait for rsync: {e}"),
            })?,
            _ = cancel.cancelled() => {
                warn!(destination = %request.destination.display(), "Cancelling rsync");
                terminate(&mut child).await;
                return Err(BackupError::Cancelled);
            }
        };

        let summary = collect(stdout_task).await;
        let diagnostics = collect(stderr_task).await;

        check_status(status, &diagnostics).map_err(|reason| BackupError::Transfer {
            destination: request.destination.clone(),
            reason,
        })?;

        Ok(TransferOutcome {
            summary: summary.join(" / "),
        })
    }
}

fn check_status(status: ExitStatus, diagnostics: &[String]) -> std::result::Result<(), String> {
    if status.success() {
        return Ok(());
    }
    if diagnostics.is_empty() {
        Err(format!("rsync {status}"))
    } else {
        Err(format!("rsync {status}: {}", diagnostics.join("; ")))
    }
}

/// Log every line of a child stream and keep the last `keep` non-empty ones.
async fn drain_lines<R>(reader: R, is_stderr: bool, keep: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(keep);

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if is_stderr {
            warn!(target: "rsync", "{}", line);
        } else {
            debug!(target: "rsync", "{}", line);
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect()
}

async fn collect(task: Option<tokio::task::JoinHandle<Vec<String>>>) -> Vec<String> {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Ask the child to stop with SIGTERM, then kill it after a grace period.
async fn terminate(child: &mut Child) {
    if send_sigterm(child)
        && tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok()
    {
        return;
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill rsync: {}", e);
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to send SIGTERM to rsync (pid {}): {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}
