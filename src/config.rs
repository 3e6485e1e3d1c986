//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ADMIN_HANDLE, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT};
use crate::transfer::TransferOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind
    pub host: String,

    /// Command port. 0 picks a free port.
    pub port: u16,

    /// Directory holding uploaded files
    pub storage_dir: PathBuf,

    /// Directory under which a folder is created for each registered handle
    pub user_root: PathBuf,

    /// Handle allowed to issue /shutdown
    pub admin_handle: String,

    /// Number of countdown notices sent before closing connections
    pub shutdown_countdown: u32,

    /// Delay between countdown notices
    pub shutdown_interval_ms: u64,

    /// How long sessions get to exit on their own before being aborted
    pub shutdown_grace_ms: u64,

    /// Limit on each wait for a peer during a file transfer
    pub transfer_timeout_ms: u64,

    /// Ask receivers to acknowledge each chunk of a download
    pub ack_chunks: bool,

    /// Reject uploads whose digest does not match the terminator
    pub verify_digest: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            storage_dir: PathBuf::from("s_files"),
            user_root: PathBuf::from("users"),
            admin_handle: DEFAULT_ADMIN_HANDLE.to_string(),
            shutdown_countdown: 10,
            shutdown_interval_ms: 1000,
            shutdown_grace_ms: 2000,
            transfer_timeout_ms: 30_000,
            ack_chunks: true,
            verify_digest: true,
        }
    }
}

impl Config {
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            mode: self.ack_chunks.into(),
            verify_digest: self.verify_digest,
            timeout: Duration::from_millis(self.transfer_timeout_ms),
        }
    }
}
