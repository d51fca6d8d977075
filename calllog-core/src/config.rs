use std::fs;
use std::path::Path;

use calllog_store::{InsertStrategy, ParseStrategyError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_MAX_WRITERS: &str = "CALLLOG_MAX_WRITERS";
pub const ENV_INSERT_STRATEGY: &str = "CALLLOG_INSERT_STRATEGY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Writer settings. YAML file first, then `CALLLOG_*` environment overrides.
///
/// ```yaml
/// max_concurrent_writes: 4
/// insert_strategy: per-row
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub max_concurrent_writes: usize,
    pub insert_strategy: InsertStrategy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_writes: 4,
            insert_strategy: InsertStrategy::Bulk,
        }
    }
}

impl WriterConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let cfg: WriterConfig = serde_yaml::from_str(&text)?;
        Ok(cfg)
    }

    /// Load from an optional file, apply process environment, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup(ENV_MAX_WRITERS) {
            self.max_concurrent_writes = v
                .trim()
                .parse()
                .map_err(|_| {
                    ConfigError::Invalid(format!("{ENV_MAX_WRITERS}={v} is not a number"))
                })?;
        }
        if let Some(v) = lookup(ENV_INSERT_STRATEGY) {
            self.insert_strategy = v
                .parse()
                .map_err(|e: ParseStrategyError| {
                    ConfigError::Invalid(format!("{ENV_INSERT_STRATEGY}: {e}"))
                })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_writes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_writes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fields_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("writer.yaml");
        fs::write(&path, "insert_strategy: per-row\n").unwrap();

        let cfg = WriterConfig::from_path(&path).unwrap();
        assert_eq!(cfg.insert_strategy, InsertStrategy::PerRow);
        assert_eq!(cfg.max_concurrent_writes, 4);
    }

    #[test]
    fn env_overrides_file_values() {
        let cfg = WriterConfig::default()
            .with_env_overrides(|key| match key {
                ENV_MAX_WRITERS => Some("8".into()),
                ENV_INSERT_STRATEGY => Some("per-row".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(cfg.max_concurrent_writes, 8);
        assert_eq!(cfg.insert_strategy, InsertStrategy::PerRow);
    }

    #[test]
    fn zero_writers_is_rejected() {
        let err = WriterConfig::default()
            .with_env_overrides(|key| (key == ENV_MAX_WRITERS).then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_strategy_names_the_variable() {
        let err = WriterConfig::default()
            .with_env_overrides(|key| (key == ENV_INSERT_STRATEGY).then(|| "batched".to_string()))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid config: CALLLOG_INSERT_STRATEGY: unknown insert strategy: batched"
        );
    }
}
