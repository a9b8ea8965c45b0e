//! Daemon configuration

use anyhow::{Context, Result};
use bmc_firmware_update::UpdaterConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default location of the daemon configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bmc-update/config.json";

/// Daemon configuration: transport, external programs and the updater itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Unix socket the request server listens on
    pub socket_path: PathBuf,
    /// Permission bits applied to the socket file
    pub socket_mode: u32,
    /// File the published object snapshot is written to
    pub snapshot_path: PathBuf,
    /// Capacity of the dispatch queue
    pub command_buffer: usize,
    /// Longest request line a client may send, newline included
    pub max_request_bytes: usize,
    /// `systemctl` used to start write and boot-environment units
    pub systemctl: PathBuf,
    /// `fw_printenv` used to read the boot-loader environment
    pub fw_printenv: PathBuf,
    /// Program run as `<program> <image dir> <key config>` to verify
    /// signatures; exit status 0 means valid
    pub verify_program: Option<PathBuf>,
    /// Item updater settings
    pub updater: UpdaterConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/bmc-update/updater.sock"),
            socket_mode: 0o600,
            snapshot_path: PathBuf::from("/run/bmc-update/objects.json"),
            command_buffer: 64,
            max_request_bytes: 64 * 1024,
            systemctl: PathBuf::from("systemctl"),
            fw_printenv: PathBuf::from("fw_printenv"),
            verify_program: None,
            updater: UpdaterConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path`, writing the defaults there when the
    /// file does not exist yet
    pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found at {:?}, creating default", path);
            let config = Self::default();
            config.save_to_path(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: ServiceConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to `path`
    pub async fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            anyhow::bail!("Socket path must not be empty");
        }
        if self.snapshot_path.as_os_str().is_empty() {
            anyhow::bail!("Snapshot path must not be empty");
        }
        if self.command_buffer == 0 {
            anyhow::bail!("Command buffer must hold at least one command");
        }
        if self.max_request_bytes == 0 {
            anyhow::bail!("Request size limit must be positive");
        }
        if self.socket_mode > 0o777 {
            anyhow::bail!("Invalid socket mode: {:o}", self.socket_mode);
        }
        if self.systemctl.as_os_str().is_empty() || self.fw_printenv.as_os_str().is_empty() {
            anyhow::bail!("External program paths must not be empty");
        }
        self.updater
            .validate()
            .context("Invalid updater configuration")?;
        Ok(())
    }
}
