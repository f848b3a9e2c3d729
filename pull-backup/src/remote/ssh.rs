//! Package manifest retrieval over ssh.

use super::ManifestFetcher;
use crate::{BackupError, Result};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default listing command on Debian-family hosts.
pub const DEFAULT_MANIFEST_COMMAND: &str = "dpkg --get-selections";

/// Runs `ssh [-p port] <host> <command>` and returns its stdout.
#[derive(Debug, Clone)]
pub struct SshManifestFetcher {
    ssh_path: String,
    host: String,
    port: Option<u16>,
    command: String,
}

impl SshManifestFetcher {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            ssh_path: "ssh".to_string(),
            host: host.into(),
            port: None,
            command: DEFAULT_MANIFEST_COMMAND.to_string(),
        }
    }

    pub fn with_ssh_path(mut self, ssh_path: impl Into<String>) -> Self {
        self.ssh_path = ssh_path.into();
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(self.host.clone());
        args.push(self.command.clone());
        args
    }

    fn fetch_error(&self, reason: String) -> BackupError {
        BackupError::RemoteFetch {
            host: self.host.clone(),
            reason,
        }
    }
}

impl ManifestFetcher for SshManifestFetcher {
    fn host(&self) -> &str {
        &self.host
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        info!(host = %self.host, command = %self.command, "Fetching package manifest");

        let output = Command::new(&self.ssh_path)
            .args(self.build_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            output = output => output
                .map_err(|e| self.fetch_error(format!("failed to launch {}: {}", self.ssh_path, e)))?,
            _ = cancel.cancelled() => return Err(BackupError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.fetch_error(format!("{} ({})", output.status, stderr.trim())));
        }

        let manifest = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(host = %self.host, bytes = manifest.len(), "Package manifest received");
        Ok(manifest)
    }
}
