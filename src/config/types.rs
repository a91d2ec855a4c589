use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;

use crate::engine::{DEFAULT_DEBOUNCE_MS, DEFAULT_SUPPRESSION_WINDOW_MS};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Where priorities, known devices and mode are stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub debounce_ms: u64,
    pub suppression_window_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub file_output: bool,
    pub json_format: bool,
    pub keep_days: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            state_dir: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            suppression_window_ms: DEFAULT_SUPPRESSION_WINDOW_MS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file_output: true,
            json_format: false,
            keep_days: 7,
        }
    }
}

impl GeneralConfig {
    pub fn level(&self) -> Result<Level> {
        self.log_level
            .parse::<Level>()
            .map_err(|_| anyhow!("Invalid log level '{}'", self.log_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: Config = toml::from_str(
            r#"
[engine]
debounce_ms = 50
"#,
        )
        .unwrap();

        assert_eq!(config.engine.debounce_ms, 50);
        assert_eq!(config.engine.suppression_window_ms, 500);
        assert_eq!(config.general.log_level, "info");
        assert!(config.logging.file_output);
    }

    #[test]
    fn test_level_parsing() {
        let mut general = GeneralConfig::default();
        assert_eq!(general.level().unwrap(), Level::INFO);

        general.log_level = "DEBUG".to_string();
        assert_eq!(general.level().unwrap(), Level::DEBUG);

        general.log_level = "loud".to_string();
        assert!(general.level().is_err());
    }

    #[test]
    fn test_default_config_round_trips() {
        let content = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&content).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
