use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::app::LoadSettings;
use crate::domain::MAX_ID;
use crate::error::DexError;
use crate::species::{DEFAULT_BASE_URL, DEFAULT_LOCALE, FETCH_TIMEOUT};

pub const DEFAULT_CONFIG_FILE: &str = "dex-cache.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub max_id: Option<u16>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub cache_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: String,
    pub locale: String,
    pub cache_dir: Option<Utf8PathBuf>,
    pub load: LoadSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; without one, a missing `dex-cache.json`
    /// in the working directory means defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DexError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| DexError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| DexError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DexError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(DexError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let locale = config
            .locale
            .map(|locale| locale.trim().to_lowercase())
            .filter(|locale| !locale.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());

        let load = LoadSettings {
            max_id: config.max_id.unwrap_or(MAX_ID).clamp(1, MAX_ID),
            timeout: config
                .timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(FETCH_TIMEOUT),
            concurrency: config.concurrency.filter(|n| *n > 0),
        };

        Ok(ResolvedConfig {
            schema_version,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            locale,
            cache_dir: config.cache_dir.map(Utf8PathBuf::from),
            load,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.locale, "de");
        assert_eq!(resolved.load.max_id, 1025);
        assert_eq!(resolved.load.timeout, Duration::from_millis(10_000));
        assert_eq!(resolved.load.concurrency, None);
        assert!(resolved.cache_dir.is_none());
    }
}
