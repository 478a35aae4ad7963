//! Runtime configuration read from the environment (after `.env` is loaded).

use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://bike_sharing.db?mode=rwc";
pub const DEFAULT_MODEL_PATH: &str = "ml_models";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5001";
pub const DEFAULT_MIN_TRAINING_ROWS: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub model_dir: PathBuf,
    pub bind_addr: String,
    pub min_training_rows: usize,
    pub default_batch_size: usize,
    pub max_upload_bytes: usize,
    /// Server-wide default for predictions whose mapping lacks features.
    pub zero_fill_missing: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            model_dir: PathBuf::from(DEFAULT_MODEL_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            min_training_rows: DEFAULT_MIN_TRAINING_ROWS,
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            zero_fill_missing: false,
        }
    }
}

impl AppConfig {
    /// Builds the config from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            model_dir: lookup("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            min_training_rows: parse_var(&lookup, "MIN_TRAINING_ROWS")?
                .unwrap_or(defaults.min_training_rows),
            default_batch_size: parse_var(&lookup, "DEFAULT_BATCH_SIZE")?
                .unwrap_or(defaults.default_batch_size),
            max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            zero_fill_missing: parse_var(&lookup, "BIKESHARE_ZERO_FILL_MISSING")?
                .unwrap_or(defaults.zero_fill_missing),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key}='{raw}' is not valid"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let cfg = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(cfg.model_dir, PathBuf::from("ml_models"));
        assert_eq!(cfg.min_training_rows, 100);
        assert!(!cfg.zero_fill_missing);
    }

    #[test]
    fn test_overrides() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("MIN_TRAINING_ROWS", "250"),
            ("BIKESHARE_ZERO_FILL_MISSING", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.min_training_rows, 250);
        assert!(cfg.zero_fill_missing);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let result = AppConfig::from_lookup(lookup_from(&[("DEFAULT_BATCH_SIZE", "lots")]));
        assert!(result.is_err());
    }
}
