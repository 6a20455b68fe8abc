//! Configuration for the logger.

use crate::store::DEFAULT_TABLE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device the particulate sensor is attached to
    pub serial_port: String,

    /// Serial baud rate
    pub baud_rate: u32,

    /// Length of each averaging window (fractional seconds)
    #[serde(with = "secs_f64_serde")]
    pub window_duration: Duration,

    /// Delay between poll cycles (milliseconds)
    #[serde(with = "millis_serde")]
    pub poll_interval: Duration,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Table the windows are written to
    pub table: String,

    /// IIO device directory of the temperature/humidity sensor
    pub environment_device: Option<PathBuf>,

    /// Append log output to this file instead of stderr
    pub log_file: Option<PathBuf>,

    /// Path for storing diagnostics
    pub data_path: PathBuf,

    /// Timezone used when printing timestamps
    pub display_timezone: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pms-logger");

        Self {
            serial_port: "/dev/ttyS0".to_string(),
            baud_rate: 9600,
            window_duration: Duration::from_millis(4900),
            poll_interval: Duration::from_millis(100),
            database_path: data_dir.join("env_data.db"),
            table: DEFAULT_TABLE.to_string(),
            environment_device: None,
            log_file: None,
            data_path: data_dir,
            display_timezone: "UTC".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `config_path`, creating its directory.
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pms-logger")
            .join("config.json")
    }

    /// Path of the persisted diagnostics counters.
    pub fn diagnostics_path(&self) -> PathBuf {
        self.data_path.join("diagnostics.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    /// Parsed display timezone.
    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.display_timezone
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.display_timezone)))
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "window_duration must be positive".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".to_string()));
        }
        self.timezone()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as fractional seconds.
mod secs_f64_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Serde support for Duration as whole milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial_port, "/dev/ttyS0");
        assert_eq!(config.window_duration, Duration::from_millis(4900));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.table, "living");
        assert!(config.environment_device.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_durations() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["window_duration"], 4.9);
        assert_eq!(json["poll_interval"], 100);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"serial_port": "/dev/ttyAMA0", "window_duration": 60}"#)
                .unwrap();
        assert_eq!(config.serial_port, "/dev/ttyAMA0");
        assert_eq!(config.window_duration, Duration::from_secs(60));
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_negative_window_rejected() {
        let parsed: Result<Config, _> = serde_json::from_str(r#"{"window_duration": -1.0}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            display_timezone: "Mars/Olympus".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            window_duration: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("pms-logger-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        let config = Config {
            serial_port: "/dev/ttyAMA0".to_string(),
            window_duration: Duration::from_secs(60),
            table: "bedroom".to_string(),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.serial_port, "/dev/ttyAMA0");
        assert_eq!(loaded.window_duration, Duration::from_secs(60));
        assert_eq!(loaded.table, "bedroom");
        assert_eq!(loaded.baud_rate, 9600);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("pms-logger-{}.json", uuid::Uuid::new_v4()));
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.baud_rate, 9600);
    }
}
