// ⚙️ Configuration - JSON file with defaults for every field

use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::distinctness::ClassifierSettings;
use crate::grouping::GroupingStrategy;

pub const DATABASE_ENV: &str = "VENUE_DEDUP_DB";

/// Where the plan artifact goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactConfig {
    /// Pretty JSON file plus a `.progress.jsonl` log beside it
    File { path: PathBuf },
    /// Plan tables inside the record store database
    Sqlite,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        ArtifactConfig::File {
            path: PathBuf::from("dedup-plan.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub database: PathBuf,
    /// Grouping passes, in evaluation order
    pub strategies: Vec<GroupingStrategy>,
    pub min_street_address_len: usize,
    pub description_divergence_ratio: f64,
    pub artifact: ArtifactConfig,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            database: PathBuf::from("venues.db"),
            strategies: GroupingStrategy::all(),
            min_street_address_len: 6,
            description_divergence_ratio: 0.5,
            artifact: ArtifactConfig::default(),
        }
    }
}

impl DedupConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: DedupConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;
        config.validate()?;

        Ok(config)
    }

    /// File (if given) or defaults, then the database env override
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        if let Ok(database) = env::var(DATABASE_ENV) {
            if !database.trim().is_empty() {
                config.database = PathBuf::from(database.trim());
            }
        }

        debug!("Loaded config: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            bail!("At least one grouping strategy is required");
        }

        let mut seen = HashSet::new();
        for strategy in &self.strategies {
            if !seen.insert(strategy) {
                bail!("Grouping strategy {} listed twice", strategy.as_str());
            }
        }

        if self.description_divergence_ratio.is_nan() || self.description_divergence_ratio < 0.0 {
            bail!(
                "description_divergence_ratio must be non-negative, got {}",
                self.description_divergence_ratio
            );
        }

        Ok(())
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            min_street_address_len: self.min_street_address_len,
            description_divergence_ratio: self.description_divergence_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "min_street_address_len": 8, "artifact": { "kind": "sqlite" } }"#,
        )
        .unwrap();

        let config = DedupConfig::from_file(&path).unwrap();

        assert_eq!(config.min_street_address_len, 8);
        assert_eq!(config.artifact, ArtifactConfig::Sqlite);
        assert_eq!(config.strategies, GroupingStrategy::all());
        assert_eq!(config.description_divergence_ratio, 0.5);
    }

    #[test]
    fn test_strategy_order_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "strategies": ["by_name", "by_address"], "artifact": { "kind": "file", "path": "out.json" } }"#,
        )
        .unwrap();

        let config = DedupConfig::from_file(&path).unwrap();

        assert_eq!(
            config.strategies,
            vec![GroupingStrategy::ByName, GroupingStrategy::ByAddress]
        );
        assert_eq!(
            config.artifact,
            ArtifactConfig::File {
                path: PathBuf::from("out.json")
            }
        );
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = DedupConfig::default();
        config.strategies = vec![GroupingStrategy::ByName, GroupingStrategy::ByName];
        assert!(config.validate().is_err());

        config.strategies = Vec::new();
        assert!(config.validate().is_err());

        config = DedupConfig::default();
        config.description_divergence_ratio = -1.0;
        assert!(config.validate().is_err());
    }
}
