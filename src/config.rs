//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SerialConfig: receiver port, baud rate and the acquisition timings.
//!     - SimulatorConfig: sample cadence when no device is attached.
//!     - ServerConfig: bind address, static assets and dev-mode redirect.
//!     - WidgetsConfig: where the dashboard widget components live.
//!     - LoggingConfig: log level and per-sample logging.
//!
//! every section is optional; missing keys take their defaults so a file
//! only needs to mention what it changes.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::SIMULATOR_PORT;
use crate::error::{HubError, Result};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HubConfig {
    pub serial: SerialConfig,
    pub simulator: SimulatorConfig,
    pub server: ServerConfig,
    pub widgets: WidgetsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    /// device path (e.g. "/dev/ttyUSB0", "COM7") or "SIMULATOR"
    pub port: String,
    pub baud_rate: u32,
    /// wait after a failed open before trying again
    pub reconnect_delay_ms: u64,
    /// wait after a read error on an open port
    pub error_backoff_ms: u64,
    pub read_timeout_ms: u64,
    /// sleep when no input is pending
    pub poll_interval_ms: u64,
    /// read bound when probing a non-selected port
    pub probe_timeout_ms: u64,
    /// a frame newer than this marks the selected port as `active_data`
    pub active_data_window_ms: u64,
    /// how long `stop` waits for the acquisition thread
    pub join_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatorConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// redirect page requests to the frontend dev server
    pub dev_mode: bool,
    pub dev_server_port: u16,
    pub static_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WidgetsConfig {
    pub catalog_dir: PathBuf,
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: SIMULATOR_PORT.to_string(),
            baud_rate: 115_200,
            reconnect_delay_ms: 2000,
            error_backoff_ms: 1000,
            read_timeout_ms: 1000,
            poll_interval_ms: 1,
            probe_timeout_ms: 500,
            active_data_window_ms: 2000,
            join_timeout_ms: 1000,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            dev_mode: false,
            dev_server_port: 5173,
            static_dir: PathBuf::from("frontend").join("dist"),
        }
    }
}

impl Default for WidgetsConfig {
    fn default() -> Self {
        Self {
            catalog_dir: ["frontend", "src", "components", "widgets"].iter().collect(),
            extensions: vec!["tsx".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: false }
    }
}

impl SerialConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn active_data_window(&self) -> Duration {
        Duration::from_millis(self.active_data_window_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl SimulatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| HubError::Config(format!("failed to read config file: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse configuration from a toml string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HubError::Config(format!("failed to parse config: {}", e)))
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("config loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("no config file found - using defaults");
        Self::default()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            port = %self.serial.port,
            baud = self.serial.baud_rate,
            "serial receiver"
        );
        tracing::info!(
            bind = %format!("{}:{}", self.server.host, self.server.port),
            dev_mode = self.server.dev_mode,
            static_dir = %self.server.static_dir.display(),
            "server"
        );
        tracing::info!(
            interval_ms = self.simulator.interval_ms,
            catalog = %self.widgets.catalog_dir.display(),
            log_level = %self.logging.level,
            "simulator and widgets"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_select_simulator() {
        let config = HubConfig::default();
        assert_eq!(config.serial.port, SIMULATOR_PORT);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.simulator.interval(), Duration::from_millis(100));
        assert_eq!(config.server.port, 8080);
        assert!(!config.server.dev_mode);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = HubConfig::parse(
            r#"
[serial]
port = "/dev/ttyUSB0"
baud_rate = 57600

[server]
dev_mode = true
"#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial.probe_timeout_ms, 500);
        assert!(config.server.dev_mode);
        assert_eq!(config.server.dev_server_port, 5173);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = HubConfig::parse("").unwrap();
        assert_eq!(config.serial.port, SIMULATOR_PORT);
        assert_eq!(config.widgets.extensions, vec!["tsx".to_string()]);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let err = HubConfig::parse("[serial]\nbaud_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, HubError::Config(_)));
    }
}
