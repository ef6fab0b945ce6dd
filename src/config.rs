use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::platform::Platform;

const CONFIG_ENV: &str = "MOBILE_DIFF_CONFIG";
const HOME_ENV: &str = "MOBILE_DIFF_HOME";

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_root: PathBuf,
    pub bridge_command: Vec<String>,
    pub transfer: TransferConfig,
    pub ssh: SshConfig,
    pub diff: DiffConfig,
    pub local_devices: Vec<LocalDevice>,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Tries per archive, never less than one.
    pub attempts: u32,
    pub retry_delay: Duration,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    pub user: String,
    /// Defaults to the device id when unset.
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DiffTool {
    Diff,
    Git,
    None,
}

#[derive(Debug, Clone)]
pub struct DiffConfig {
    pub tool: DiffTool,
    pub unified: u32,
    pub color: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalDevice {
    pub id: String,
    pub name: Option<String>,
    pub platform: Platform,
    pub root: PathBuf,
}

// on-disk shape; every field optional so partial files layer over defaults
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    storage_root: Option<PathBuf>,
    #[serde(default)]
    bridge: FileBridge,
    #[serde(default)]
    transfer: FileTransfer,
    #[serde(default)]
    ssh: FileSsh,
    #[serde(default)]
    diff: FileDiff,
    #[serde(default)]
    local_devices: Vec<LocalDevice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileBridge {
    command: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileTransfer {
    attempts: Option<u32>,
    retry_delay: Option<String>,
    chunk_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSsh {
    user: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileDiff {
    tool: Option<DiffTool>,
    unified: Option<u32>,
    color: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_root: default_storage_root(),
            bridge_command: vec!["mobile-diff-bridge".to_string()],
            transfer: TransferConfig {
                attempts: 2,
                retry_delay: Duration::from_millis(500),
                chunk_size: 1024 * 1024,
            },
            ssh: SshConfig {
                user: "root".to_string(),
                host: None,
                port: None,
            },
            diff: DiffConfig {
                tool: DiffTool::Diff,
                unified: 3,
                color: true,
            },
            local_devices: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults, then the config file (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = config_path() {
            if path.exists() {
                config.merge_file(&path)?;
            }
        }

        if let Some(home) = std::env::var_os(HOME_ENV) {
            config.storage_root = PathBuf::from(home);
        }

        Ok(config)
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        self.merge_toml(&content).map_err(|message| Error::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    fn merge_toml(&mut self, content: &str) -> std::result::Result<(), String> {
        let file: FileConfig = toml::from_str(content).map_err(|e| e.to_string())?;

        if let Some(root) = file.storage_root {
            self.storage_root = root;
        }
        if let Some(command) = file.bridge.command {
            if command.is_empty() {
                return Err("bridge.command must not be empty".to_string());
            }
            self.bridge_command = command;
        }

        if let Some(attempts) = file.transfer.attempts {
            self.transfer.attempts = attempts.max(1);
        }
        if let Some(delay) = file.transfer.retry_delay {
            self.transfer.retry_delay = humantime::parse_duration(&delay)
                .map_err(|e| format!("transfer.retry_delay '{delay}': {e}"))?;
        }
        if let Some(chunk_size) = file.transfer.chunk_size {
            if chunk_size == 0 {
                return Err("transfer.chunk_size must be positive".to_string());
            }
            self.transfer.chunk_size = chunk_size;
        }

        if let Some(user) = file.ssh.user {
            self.ssh.user = user;
        }
        self.ssh.host = file.ssh.host.or(self.ssh.host.take());
        self.ssh.port = file.ssh.port.or(self.ssh.port);

        if let Some(tool) = file.diff.tool {
            self.diff.tool = tool;
        }
        if let Some(unified) = file.diff.unified {
            self.diff.unified = unified;
        }
        if let Some(color) = file.diff.color {
            self.diff.color = color;
        }

        self.local_devices.extend(file.local_devices);
        Ok(())
    }
}

fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("", "", "mobile-diff")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// `~/.mobile-diff/snapshots`, or a relative fallback when no home exists.
fn default_storage_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mobile-diff")
        .join("snapshots")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.storage_root.ends_with(".mobile-diff/snapshots"));
        assert_eq!(config.transfer.attempts, 2);
        assert_eq!(config.diff.tool, DiffTool::Diff);
        assert_eq!(config.ssh.user, "root");
    }

    #[test]
    fn toml_layers_over_defaults() {
        let mut config = Config::default();
        config
            .merge_toml(
                r#"
                storage_root = "/data/snaps"

                [transfer]
                attempts = 0
                retry_delay = "2s"

                [diff]
                tool = "git"

                [[local_devices]]
                id = "sim"
                platform = "ios"
                root = "/tmp/sim"
                "#,
            )
            .unwrap();

        assert_eq!(config.storage_root, PathBuf::from("/data/snaps"));
        assert_eq!(config.transfer.attempts, 1);
        assert_eq!(config.transfer.retry_delay, Duration::from_secs(2));
        assert_eq!(config.transfer.chunk_size, 1024 * 1024);
        assert_eq!(config.diff.tool, DiffTool::Git);
        assert_eq!(config.diff.unified, 3);
        assert_eq!(config.local_devices.len(), 1);
        assert_eq!(config.local_devices[0].platform, Platform::Ios);
    }

    #[test]
    fn unknown_keys_and_bad_durations_are_rejected() {
        let mut config = Config::default();
        assert!(config.merge_toml("colour = true").is_err());
        assert!(config.merge_toml("[transfer]\nretry_delay = \"soon\"").is_err());
    }

    #[test]
    fn merge_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bridge]\ncommand = []\n").unwrap();

        let err = Config::default().merge_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config { path: p, .. } if p == path));
    }
}
