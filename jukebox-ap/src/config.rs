//! Configuration management for jukebox-ap
//!
//! Bootstrap configuration comes from a TOML file (`jukebox.toml`). Every
//! field has a built-in default, so the service starts with no file at all.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--port, --root-folder, --serial-port)
//! 2. Environment variables (JUKEBOX_ROOT_FOLDER)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! Runtime-editable player preferences live in `settings.json` instead
//! (see [`crate::playback::settings`]).

use crate::error::{Error, Result};
use jukebox_common::config::{load_toml, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root folder for persisted documents and music
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub player: PlayerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            root_folder: None,
            reader: ReaderConfig::default(),
            sink: SinkConfig::default(),
            player: PlayerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// NFC reader and polling loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Serial device of the PN532 (e.g. /dev/ttyS0, /dev/serial0)
    pub serial_port: String,
    pub baud_rate: u32,
    /// Per-attempt timeout for one passive-target read
    pub read_timeout_ms: u64,
    /// Pause between two reads
    pub poll_interval_ms: u64,
    /// Fixed backoff after a failed read
    pub error_backoff_ms: u64,
    /// Consecutive failures before the reader is reported degraded
    pub degraded_after_errors: u32,
    /// Consecutive "no token" reads before the same token may fire again
    pub removal_grace_reads: u32,
    /// Stop the track when the token that started it is removed
    pub stop_on_removal: bool,
    /// Capacity of the poller → playback channel
    pub event_queue_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyS0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 500,
            poll_interval_ms: 100,
            error_backoff_ms: 1000,
            degraded_after_errors: 5,
            removal_grace_reads: 1,
            stop_on_removal: false,
            event_queue_capacity: 16,
        }
    }
}

impl ReaderConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Bluetooth sink settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Wall-clock budget for one scan
    pub scan_duration_secs: u64,
    /// Startup reconnection rounds before giving up
    pub reconnect_attempts: u32,
    pub reconnect_initial_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
    /// Pending adapter operations accepted before callers wait
    pub command_queue_capacity: usize,
    /// bluetoothctl executable
    pub bluetoothctl: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            scan_duration_secs: 5,
            reconnect_attempts: 5,
            reconnect_initial_backoff_ms: 1000,
            reconnect_max_backoff_ms: 30_000,
            command_queue_capacity: 32,
            bluetoothctl: "bluetoothctl".to_string(),
        }
    }
}

impl SinkConfig {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }

    /// Backoff before reconnection round `round` (0-based), capped
    pub fn reconnect_backoff(&self, round: u32) -> Duration {
        let factor = 1u64.checked_shl(round.min(31)).unwrap_or(u64::MAX);
        let ms = self
            .reconnect_initial_backoff_ms
            .saturating_mul(factor)
            .min(self.reconnect_max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// External player command
///
/// `{path}` and `{sink}` in `args` are replaced by the media path and the
/// connected sink address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: "ffplay".to_string(),
            args: ["-nodisp", "-autoexit", "-loglevel", "quiet", "{path}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn default_port() -> u16 {
    5000
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub root_folder: Option<PathBuf>,
    pub serial_port: Option<String>,
}

impl TomlConfig {
    /// Load the TOML file (or defaults when it is absent) and apply overrides
    ///
    /// `root_folder` is left for [`jukebox_common::config::RootFolderResolver`]
    /// since the environment sits between CLI and TOML in priority.
    pub fn load(path: &Path, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match load_toml::<TomlConfig>(path).map_err(Error::from)? {
            Some(config) => {
                info!("Loaded TOML configuration from {}", path.display());
                config
            }
            None => TomlConfig::default(),
        };

        if let Some(port) = overrides.port {
            config.port = port;
        }
        if let Some(serial_port) = &overrides.serial_port {
            config.reader.serial_port = serial_port.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.player.command.trim().is_empty() {
            return Err(Error::Config("player.command cannot be empty".to_string()));
        }
        if self.reader.event_queue_capacity == 0 {
            return Err(Error::Config(
                "reader.event_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.sink.command_queue_capacity == 0 {
            return Err(Error::Config(
                "sink.command_queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config =
            TomlConfig::load(&dir.path().join("jukebox.toml"), &ConfigOverrides::default())
                .unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.reader.serial_port, "/dev/ttyS0");
        assert_eq!(config.reader.baud_rate, 115_200);
        assert_eq!(config.sink.scan_duration_secs, 5);
        assert_eq!(config.player.command, "ffplay");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jukebox.toml");
        std::fs::write(
            &path,
            "port = 8080\n[reader]\nserial_port = \"/dev/serial0\"\n[player]\ncommand = \"mpg123\"\n",
        )
        .unwrap();

        let config = TomlConfig::load(&path, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.reader.serial_port, "/dev/serial0");
        assert_eq!(config.reader.poll_interval_ms, 100);
        assert_eq!(config.player.command, "mpg123");
        // args keep their default since only `command` was given
        assert!(config.player.args.contains(&"{path}".to_string()));
    }

    #[test]
    fn test_overrides_win() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jukebox.toml");
        std::fs::write(&path, "port = 8080\n").unwrap();

        let overrides = ConfigOverrides {
            port: Some(9000),
            root_folder: None,
            serial_port: Some("/dev/ttyUSB0".to_string()),
        };
        let config = TomlConfig::load(&path, &overrides).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.reader.serial_port, "/dev/ttyUSB0");
    }

    #[test]
    fn test_empty_player_command_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jukebox.toml");
        std::fs::write(&path, "[player]\ncommand = \"\"\n").unwrap();

        assert!(matches!(
            TomlConfig::load(&path, &ConfigOverrides::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_reconnect_backoff_doubles_and_caps() {
        let sink = SinkConfig {
            reconnect_initial_backoff_ms: 1000,
            reconnect_max_backoff_ms: 5000,
            ..SinkConfig::default()
        };
        assert_eq!(sink.reconnect_backoff(0), Duration::from_millis(1000));
        assert_eq!(sink.reconnect_backoff(1), Duration::from_millis(2000));
        assert_eq!(sink.reconnect_backoff(2), Duration::from_millis(4000));
        assert_eq!(sink.reconnect_backoff(3), Duration::from_millis(5000));
        assert_eq!(sink.reconnect_backoff(40), Duration::from_millis(5000));
    }
}
