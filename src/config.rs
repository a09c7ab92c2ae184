//! Application configuration using Figment.
//!
//! Configuration is merged from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`config/focuserlink.toml` unless another path is given)
//! 3. environment variables prefixed with `FOCUSERLINK_`, sections separated
//!    by a double underscore, e.g. `FOCUSERLINK_DEVICE__PORT=/dev/ttyACM0`
//!
//! # Example
//! ```no_run
//! use focuserlink::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Device: {}", config.device.port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use focuserlink_driver::DriverOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/focuserlink.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FOCUSERLINK_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial device and poll settings
    pub device: DeviceConfig,
    /// Local configuration store
    pub store: StoreConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
    /// Log a line when each instrumented span closes
    pub log_spans: bool,
    /// How long one-shot move commands wait for the focuser to settle, in seconds
    pub move_wait_secs: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "FocuserLink".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            log_spans: false,
            move_wait_secs: 120,
        }
    }
}

/// Serial device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial device path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read budget per response in milliseconds
    pub timeout_ms: u64,
    /// Poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Window for discarding stale input around an exchange, in milliseconds
    pub drain_ms: u64,
    /// Wait for move commands to be echoed
    pub move_ack: bool,
    /// Start polling right after the handshake
    pub poll_on_connect: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let options = DriverOptions::default();
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 38400,
            timeout_ms: duration_ms(options.response_timeout),
            poll_interval_ms: duration_ms(options.poll_interval),
            drain_ms: options.drain_ms,
            move_ack: options.move_ack,
            poll_on_connect: options.poll_on_connect,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl DeviceConfig {
    /// Driver options for this device.
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            response_timeout: Duration::from_millis(self.timeout_ms),
            drain_ms: self.drain_ms,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            move_ack: self.move_ack,
            poll_on_connect: self.poll_on_connect,
        }
    }
}

/// Local configuration store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// File holding driver-owned settings (backlash)
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/focuserlink-state.toml"),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.device.port.trim().is_empty() {
            return Err("Device port must not be empty".to_string());
        }
        if self.device.baud_rate == 0 {
            return Err("Invalid baud_rate 0".to_string());
        }
        if self.device.timeout_ms == 0 {
            return Err("Invalid timeout_ms 0. Must be at least 1".to_string());
        }
        if self.application.move_wait_secs == 0 {
            return Err("Invalid move_wait_secs 0. Must be at least 1".to_string());
        }
        if self.device.poll_interval_ms == 0 {
            return Err("Invalid poll_interval_ms 0. Must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.device.baud_rate, 38400);
        assert_eq!(config.device.timeout_ms, 3000);
        assert_eq!(config.device.poll_interval_ms, 500);
        assert!(config.device.move_ack);
        assert!(config.device.poll_on_connect);
        assert_eq!(config.application.move_wait_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[device]
port = "/dev/ttyACM3"
poll_interval_ms = 250
move_ack = false
poll_on_connect = false
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "FocuserLink");
        assert_eq!(config.device.port, "/dev/ttyACM3");
        assert_eq!(config.device.baud_rate, 38400);

        let options = config.device.driver_options();
        assert_eq!(options.poll_interval, Duration::from_millis(250));
        assert!(!options.move_ack);
        assert!(!options.poll_on_connect);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_move_wait_rejected() {
        let mut config = AppConfig::default();
        config.application.move_wait_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = AppConfig::default();
        config.device.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_options_match_driver() {
        assert_eq!(
            AppConfig::default().device.driver_options(),
            DriverOptions::default()
        );
    }
}
