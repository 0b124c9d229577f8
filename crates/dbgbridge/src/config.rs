//! Bridge configuration
//!
//! Configuration can be built in code, or loaded from a TOML/YAML/JSON file
//! with `DBGBRIDGE__*` environment variables layered on top:
//!
//! ```toml
//! [connection]
//! port = 9000
//! idekey = "dbgbridge"
//! break_on_entry = true
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! `DBGBRIDGE__CONNECTION__PORT=9003` then overrides the port.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "DBGBRIDGE";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Engine-side settings
    pub connection: ConnectionConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Engine-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Address the engine listener binds to
    pub bind_address: String,
    /// Port the engine listener binds to
    pub port: u16,
    /// Only accept engines announcing this IDE key
    pub idekey: Option<String>,
    /// Maximum number of live sessions
    pub max_sessions: usize,
    /// Timeout for non-continuation engine commands, in milliseconds
    pub command_timeout_ms: u64,
    /// Stop on the first line instead of running to the first breakpoint
    pub break_on_entry: bool,
    /// URL reported as the page frame
    pub target_url: String,
    /// Capacity of the session event channel
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 9000,
            idekey: None,
            max_sessions: 8,
            command_timeout_ms: 5_000,
            break_on_entry: false,
            target_url: "file:///".to_string(),
            event_capacity: 256,
        }
    }
}

impl ConnectionConfig {
    /// Command timeout as a `Duration`
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Check values that would make the bridge unusable
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] naming the offending key.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.max_sessions == 0 {
            return Err(BridgeError::configuration_with_key(
                "must allow at least one session",
                "connection.max_sessions",
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(BridgeError::configuration_with_key(
                "must be greater than zero",
                "connection.command_timeout_ms",
            ));
        }
        if self.event_capacity == 0 {
            return Err(BridgeError::configuration_with_key(
                "must be greater than zero",
                "connection.event_capacity",
            ));
        }
        if self.idekey.as_deref() == Some("") {
            return Err(BridgeError::configuration_with_key(
                "must not be empty, omit it to accept any key",
                "connection.idekey",
            ));
        }
        Ok(())
    }
}

/// Where log output goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// Discard logs
    None,
    /// Standard error; stdout is left to the client protocol
    #[default]
    Stderr,
    /// Rolling files only
    File,
    /// Standard error and rolling files
    Both,
}

/// How often log files roll over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// Every hour
    Hourly,
    /// Every day
    #[default]
    Daily,
    /// Single file
    Never,
}

/// Logging settings, see [`LoggingConfig::init`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    pub level: String,
    /// JSON lines instead of human-readable text
    pub structured: bool,
    /// Output target
    pub output: LogOutput,
    /// Directory for log files
    pub directory: Option<PathBuf>,
    /// Log file name prefix
    pub file_prefix: String,
    /// Log file rotation
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            output: LogOutput::Stderr,
            directory: None,
            file_prefix: "dbgbridge".to_string(),
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Warnings and errors on stderr
    pub fn quiet() -> Self {
        Self {
            level: "warn".to_string(),
            ..Self::default()
        }
    }

    /// Everything from dbgbridge at debug level on stderr
    pub fn verbose() -> Self {
        Self {
            level: "dbgbridge=debug,dbgbridge_native=debug,info".to_string(),
            ..Self::default()
        }
    }

    /// JSON logs to rolling files in `directory`
    pub fn file(directory: impl Into<PathBuf>) -> Self {
        Self {
            structured: true,
            output: LogOutput::File,
            directory: Some(directory.into()),
            ..Self::default()
        }
    }
}

impl BridgeConfig {
    /// Load from a file, with `DBGBRIDGE__*` environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has an unsupported extension,
    /// does not parse, or holds invalid connection settings.
    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load from a file, with environment overrides under a custom prefix
    ///
    /// # Errors
    ///
    /// See [`BridgeConfig::from_file`].
    pub fn from_file_with_prefix(path: impl AsRef<Path>, env_prefix: &str) -> BridgeResult<Self> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(BridgeError::configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            other => {
                return Err(BridgeError::configuration(format!(
                    "unsupported config format: {}",
                    other.unwrap_or("<none>")
                )));
            }
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| BridgeError::configuration("config path is not valid UTF-8"))?;

        let loaded: Self = Config::builder()
            .add_source(File::new(path_str, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.connection.validate()?;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.connection.validate().is_ok());
        assert_eq!(config.connection.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.output, LogOutput::Stderr);
    }

    #[test]
    fn test_validate_rejects_zero_sessions() {
        let config = ConnectionConfig {
            max_sessions: 0,
            ..ConnectionConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Configuration { key: Some(ref key), .. } if key == "connection.max_sessions"
        ));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[connection]\nport = 9003\nidekey = \"dbg\"\nbreak_on_entry = true\n\n[logging]\nlevel = \"debug\"\noutput = \"none\""
        )
        .unwrap();

        let config = BridgeConfig::from_file_with_prefix(file.path(), "DBGBRIDGE_TEST_TOML").unwrap();
        assert_eq!(config.connection.port, 9003);
        assert_eq!(config.connection.idekey.as_deref(), Some("dbg"));
        assert!(config.connection.break_on_entry);
        assert_eq!(config.connection.max_sessions, 8);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.output, LogOutput::None);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"connection": {{"target_url": "http://localhost/app"}}}}"#).unwrap();

        let config = BridgeConfig::from_file_with_prefix(file.path(), "DBGBRIDGE_TEST_JSON").unwrap();
        assert_eq!(config.connection.target_url, "http://localhost/app");
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        assert!(BridgeConfig::from_file("/definitely/not/here.toml").is_err());

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(BridgeConfig::from_file(file.path()).is_err());
    }
}
