//! Configuration management for pull-backup.
//!
//! Loads configuration from a TOML file; command-line flags override
//! individual values afterwards.

use crate::remote::ssh::DEFAULT_MANIFEST_COMMAND;
use crate::remote::SshManifestFetcher;
use crate::transfer::{LocalTreeTransferer, RsyncTransferer, TransferEngine, DEFAULT_EXCLUDES};
use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// ssh destination of the backed-up host (`user@host`)
    #[serde(default)]
    pub host: String,

    /// Directory on the host to back up
    #[serde(default = "default_remote_path")]
    pub path: String,

    /// ssh port, when not the default
    #[serde(default)]
    pub ssh_port: Option<u16>,

    /// Command printing the installed-package listing
    #[serde(default = "default_manifest_command")]
    pub manifest_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding the dated snapshots and `latest`
    #[serde(default = "default_backup_root")]
    pub root: PathBuf,

    /// Snapshots strictly older than this many days are deleted
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Which engine copies the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// rsync over ssh from the remote host
    #[default]
    Rsync,
    /// In-process mirror of a locally mounted path
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub engine: EngineKind,

    #[serde(default = "default_rsync_path")]
    pub rsync_path: String,

    #[serde(default = "default_ssh_path")]
    pub ssh_path: String,

    /// Exclude patterns (rsync syntax, anchored at the transfer root)
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Appended to the rsync command line as-is
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_remote_path() -> String {
    "/".to_string()
}

fn default_manifest_command() -> String {
    DEFAULT_MANIFEST_COMMAND.to_string()
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("/var/backups/pull")
}

fn default_retention_days() -> u32 {
    7
}

fn default_rsync_path() -> String {
    "rsync".to_string()
}

fn default_ssh_path() -> String {
    "ssh".to_string()
}

fn default_excludes() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            path: default_remote_path(),
            ssh_port: None,
            manifest_command: default_manifest_command(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: default_backup_root(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            rsync_path: default_rsync_path(),
            ssh_path: default_ssh_path(),
            excludes: default_excludes(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Check the values a run cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            return Err(BackupError::Config("remote.host must be set".to_string()));
        }
        if self.remote.path.trim().is_empty() {
            return Err(BackupError::Config("remote.path must not be empty".to_string()));
        }
        if self.backup.root.as_os_str().is_empty() {
            return Err(BackupError::Config("backup.root must not be empty".to_string()));
        }
        Ok(())
    }

    /// Remote shell for rsync's `-e`, or `None` when plain `ssh` will do.
    pub fn remote_shell(&self) -> Option<String> {
        match (self.transfer.ssh_path.as_str(), self.remote.ssh_port) {
            ("ssh", None) => None,
            (ssh, None) => Some(ssh.to_string()),
            (ssh, Some(port)) => Some(format!("{ssh} -p {port}")),
        }
    }

    /// Transfer source as the configured engine expects it.
    pub fn transfer_source(&self) -> String {
        match self.transfer.engine {
            EngineKind::Rsync => format!("{}:{}", self.remote.host, self.remote.path),
            EngineKind::Local => self.remote.path.clone(),
        }
    }

    pub fn build_fetcher(&self) -> SshManifestFetcher {
        SshManifestFetcher::new(self.remote.host.clone())
            .with_ssh_path(self.transfer.ssh_path.clone())
            .with_port(self.remote.ssh_port)
            .with_command(self.remote.manifest_command.clone())
    }

    pub fn build_engine(&self) -> TransferEngine {
        match self.transfer.engine {
            EngineKind::Rsync => TransferEngine::Rsync(
                RsyncTransferer::new(self.transfer.rsync_path.clone())
                    .with_remote_shell(self.remote_shell())
                    .with_extra_args(self.transfer.extra_args.clone()),
            ),
            EngineKind::Local => TransferEngine::Local(LocalTreeTransferer::new()),
        }
    }
}
