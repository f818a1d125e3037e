//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/extrpc/config.toml` by default:
//!
//! ```toml
//! engine = "firefox"
//! extension_id = "votes-exporter@example.org"
//! call_timeout_secs = 10
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use extrpc_core::{Engine, EngineError, TracingConfig, TracingOutputFormat};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{ClientError, ClientResult};

/// Configuration for the extrpc contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Engine descriptor, `chromium` or `firefox`.
    pub engine: String,

    /// Id of the extension pages address on Chromium.
    pub extension_id: String,

    /// Tab to wire. A fresh tab is opened when unset.
    pub tab_id: Option<u32>,

    /// Upper bound for one call, in seconds. Calls wait forever when unset.
    pub call_timeout_secs: Option<u64>,

    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Chromium.descriptor().to_string(),
            extension_id: "extrpc-demo".to_string(),
            tab_id: None,
            call_timeout_secs: None,
            logging: LoggingSettings::default(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level for the extrpc crates: error, warn, info, debug or trace.
    pub level: String,

    /// Output format: compact, pretty or json.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl LoggingSettings {
    /// Converts to a tracing configuration.
    pub fn to_tracing_config(&self) -> ClientResult<TracingConfig> {
        let level: Level = self
            .level
            .parse()
            .map_err(|_| ClientError::Config(format!("invalid log level '{}'", self.level)))?;
        let format = match self.format.to_ascii_lowercase().as_str() {
            "compact" => TracingOutputFormat::Compact,
            "pretty" => TracingOutputFormat::Pretty,
            "json" => TracingOutputFormat::Json,
            other => {
                return Err(ClientError::Config(format!(
                    "invalid log format '{other}', expected compact, pretty or json"
                )));
            }
        };
        Ok(TracingConfig::default()
            .with_level(level)
            .with_format(format))
    }
}

impl RpcConfig {
    /// Loads configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Resolves the engine descriptor.
    pub fn engine(&self) -> Result<Engine, EngineError> {
        Engine::from_descriptor(&self.engine)
    }

    /// The call timeout, if configured.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("extrpc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.engine().unwrap(), Engine::Chromium);
        assert_eq!(config.call_timeout(), None);
        assert!(config.tab_id.is_none());
        assert!(RpcConfig::default_path().ends_with("extrpc/config.toml"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
engine = "Firefox"
extension_id = "votes@example.org"
call_timeout_secs = 3

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = RpcConfig::load_from(file.path()).unwrap();
        assert_eq!(config.engine().unwrap(), Engine::Firefox);
        assert_eq!(config.extension_id, "votes@example.org");
        assert_eq!(config.call_timeout(), Some(Duration::from_secs(3)));

        let tracing = config.logging.to_tracing_config().unwrap();
        assert_eq!(tracing.default_level, Level::DEBUG);
        assert_eq!(tracing.output_format, TracingOutputFormat::Json);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: RpcConfig = toml::from_str("tab_id = 4\n").unwrap();
        assert_eq!(config.tab_id, Some(4));
        assert_eq!(config.engine, "chromium");
        assert_eq!(config.logging, LoggingSettings::default());
    }

    #[test]
    fn unknown_engine_fails_when_resolved() {
        let config: RpcConfig = toml::from_str("engine = \"safari\"\n").unwrap();
        assert_eq!(
            config.engine().unwrap_err(),
            EngineError::Unrecognized("safari".to_string())
        );
    }

    #[test]
    fn invalid_logging_settings() {
        let bad_level = LoggingSettings {
            level: "loud".to_string(),
            ..LoggingSettings::default()
        };
        assert!(bad_level.to_tracing_config().is_err());

        let bad_format = LoggingSettings {
            format: "xml".to_string(),
            ..LoggingSettings::default()
        };
        assert!(bad_format.to_tracing_config().is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RpcConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = RpcConfig {
            tab_id: Some(2),
            call_timeout_secs: Some(30),
            ..RpcConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<RpcConfig>(&text).unwrap(), config);
    }
}
