use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use payday_core::EngineConfig;
use serde::{Deserialize, Serialize};

const REMOTE_FILE: &str = "remote.json";

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Directory for the local cache and the simulated remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// File backing the simulated remote store (defaults to `<dataDir>/remote.json`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<PathBuf>,

    /// Engine overrides; missing fields use the engine defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize config")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn remote_path(&self) -> PathBuf {
        self.remote_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join(REMOTE_FILE))
    }

    /// Engine config with `dataDir` pointing at this CLI's data directory
    /// unless the engine section sets its own.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = match &self.engine {
            Some(engine) => engine.clone(),
            None => EngineConfig::new(self.data_dir()),
        };
        if engine.data_dir == EngineConfig::default().data_dir {
            engine.data_dir = self.data_dir();
        }
        engine.validate().context("Invalid engine config")?;
        Ok(engine)
    }
}

/// Default data directory when no config is provided
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".payday")
}

#[cfg(test)]
mod tests {
    use super::*;
    use payday_core::{Activity, Amount};

    #[test]
    fn test_parse_config_minimal() {
        let config = CliConfig::from_json("{}").unwrap();
        assert!(config.data_dir.is_none());
        assert!(config.engine.is_none());
        assert_eq!(config.data_dir(), default_data_dir());
        assert_eq!(config.remote_path(), default_data_dir().join("remote.json"));
    }

    #[test]
    fn test_parse_config_with_engine_overrides() {
        let json = r#"{
            "dataDir": "/tmp/payday-test",
            "engine": {
                "dailyLimitPerActivity": {"wheel": 5},
                "minWithdrawEarned": 250.5
            }
        }"#;
        let config = CliConfig::from_json(json).unwrap();
        let engine = config.engine_config().unwrap();

        assert_eq!(engine.data_dir, PathBuf::from("/tmp/payday-test"));
        assert_eq!(engine.daily_limit(Activity::Wheel), 5);
        assert_eq!(engine.min_withdraw_earned, Amount::from_cents(25050));
        assert_eq!(config.remote_path(), PathBuf::from("/tmp/payday-test/remote.json"));
    }

    #[test]
    fn test_invalid_engine_section_is_rejected() {
        let json = r#"{"engine": {"resetWindowSecs": 0}}"#;
        let config = CliConfig::from_json(json).unwrap();
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payday.json");
        std::fs::write(&path, r#"{"remotePath": "/tmp/r.json"}"#).unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.remote_path(), PathBuf::from("/tmp/r.json"));
        let round_trip = CliConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(round_trip.remote_path, config.remote_path);

        assert!(CliConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
