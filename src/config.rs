//! Process configuration: bootstrap-on-first-run JSON file, reloadable at
//! runtime.
//!
//! Grounded on the teacher's `config::Config` (`load`/`save`/`reload`,
//! "write defaults if the file doesn't exist yet", `anyhow::Context` on every
//! I/O step) — the nested sub-config-per-concern shape is kept, generalized
//! from wallet/swap/rpc concerns to database/logging/address-derivation/
//! ingestion concerns.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub address: AddressConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub scam_detection: ScamDetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Relative path for file-persisted logs. `None` disables file logging
    /// (console-only), since this crate has no OS data-dir lookup to fall
    /// back on the way the teacher's UI tool does.
    pub log_file: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: Some("chainledger.log".to_string()),
        }
    }
}

/// Defaults mirror `address::DEFAULT_GAP_LIMIT` (spec §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressConfig {
    pub default_gap_limit: u32,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            default_gap_limit: crate::address::DEFAULT_GAP_LIMIT,
        }
    }
}

/// Defaults mirror the constants in `providers::manager` (spec §4.7/§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub max_retries: u32,
    pub request_timeout_seconds: u64,
    pub dedup_window_size: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout_seconds: 30,
            dedup_window_size: 4096,
        }
    }
}

/// Scam-token signal weights (spec §9 Open Questions: "the exact signal
/// weights are not specified here" — kept data-driven rather than a fixed
/// table baked into the binary). Empty by default: with no weights
/// configured, `threshold` is unreachable and detection is a no-op until an
/// operator populates this section from their own signal research.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScamDetectionConfig {
    pub weights: std::collections::HashMap<String, f64>,
    pub unverified_weight: f64,
    pub threshold: f64,
}

impl Default for ScamDetectionConfig {
    fn default() -> Self {
        Self {
            weights: std::collections::HashMap::new(),
            unverified_weight: 0.0,
            threshold: 1.0,
        }
    }
}

impl From<&ScamDetectionConfig> for crate::scam::ScamSignalWeights {
    fn from(cfg: &ScamDetectionConfig) -> Self {
        Self {
            weights: cfg.weights.clone(),
            unverified_weight: cfg.unverified_weight,
            threshold: cfg.threshold,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "chainledger.db".to_string(),
            },
            general: GeneralConfig::default(),
            address: AddressConfig::default(),
            ingestion: IngestionConfig::default(),
            scam_detection: ScamDetectionConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            let default_config = Self::default();
            default_config.save(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path).with_context(|| format!("Failed to read config file: {path}"))?;

        let config: Self =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse config file: {path}"))?;

        if config.database.path.is_empty() {
            return Err(anyhow::anyhow!("database.path is required in config"));
        }

        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write config file: {path}"))?;
        Ok(())
    }

    pub fn reload(&mut self, path: &str) -> Result<()> {
        *self = Self::load(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_bootstraps_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path_str = path.to_str().unwrap();

        let config = Config::load(path_str).unwrap();
        assert_eq!(config.database.path, "chainledger.db");
        assert!(path.exists());
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path_str = path.to_str().unwrap();

        let mut config = Config::load(path_str).unwrap();
        let mut edited = config.clone();
        edited.ingestion.max_retries = 7;
        edited.save(path_str).unwrap();

        config.reload(path_str).unwrap();
        assert_eq!(config.ingestion.max_retries, 7);
    }

    #[test]
    fn rejects_empty_database_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"database": {"path": ""}}"#).unwrap();
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }
}
