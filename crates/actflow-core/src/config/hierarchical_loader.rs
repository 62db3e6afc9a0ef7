//! Layered resilience settings
//!
//! Sources, lowest precedence first:
//! 1. Embedded defaults (built into the library)
//! 2. `actflow.yaml` in the config directory
//! 3. Environment variables (ACTFLOW_* prefix)
//! 4. Builder calls on the options types (handled by caller)

use std::env;
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use serde_yaml_ng::Value;

use super::types::ResilienceConfig;
use crate::error::{Error, Result};

/// Defaults compiled into the library
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/defaults/"]
#[prefix = ""]
struct EmbeddedConfigs;

/// File name looked up in the config directory
pub const CONFIG_FILE_NAME: &str = "actflow.yaml";

/// Resolves [`ResilienceConfig`] from defaults, file and environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: Utf8PathBuf,
}

impl ConfigLoader {
    /// Create a loader for the standard config directory
    ///
    /// `ACTFLOW_CONFIG_DIR` wins over the platform config directory
    /// (`~/.config/actflow` on Linux).
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Look for `actflow.yaml` in `config_dir` instead
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    fn get_config_dir() -> Result<Utf8PathBuf> {
        if let Ok(dir) = env::var("ACTFLOW_CONFIG_DIR") {
            return Ok(Utf8PathBuf::from(dir));
        }

        let base = dirs::config_dir()
            .ok_or_else(|| Error::invalid_config("Could not determine config directory"))?;
        let base = Utf8PathBuf::from_path_buf(base)
            .map_err(|p| Error::invalid_config(format!("Non UTF-8 config directory: {}", p.display())))?;

        Ok(base.join("actflow"))
    }

    /// Load the resilience configuration with hierarchical precedence
    pub fn load(&self) -> Result<ResilienceConfig> {
        let mut layered = Self::load_embedded_config::<Value>("resilience.yaml")?;

        let config_path = self.config_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            let file = self.load_yaml_file::<Value>(&config_path)?;
            layered = Self::merge_yaml(layered, file);
            tracing::debug!(path = %config_path, "loaded resilience config file");
        }

        let config: ResilienceConfig = serde_yaml_ng::from_value(layered)
            .map_err(|e| Error::invalid_config(format!("{config_path}: {e}")))?;
        let config = Self::apply_env_overrides(config)?;
        Self::validate(&config)?;

        Ok(config)
    }

    /// Load a YAML file from an explicit path
    pub fn load_file(path: &Utf8Path) -> Result<ResilienceConfig> {
        if !path.exists() {
            return Err(Error::config_not_found(path.as_str()));
        }
        let content = fs::read_to_string(path)?;
        let config: ResilienceConfig = serde_yaml_ng::from_str(&content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn load_embedded_config<T: DeserializeOwned>(name: &str) -> Result<T> {
        let file = EmbeddedConfigs::get(name)
            .ok_or_else(|| Error::config_not_found(format!("embedded defaults {name}")))?;
        let text = std::str::from_utf8(&file.data)
            .map_err(|_| Error::invalid_config(format!("embedded defaults {name} are not UTF-8")))?;

        serde_yaml_ng::from_str(text)
            .map_err(|e| Error::invalid_config(format!("embedded defaults {name}: {e}")))
    }

    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let text = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&text).map_err(|e| Error::invalid_config(format!("{path}: {e}")))
    }

    /// Overlay `overlay` onto `base` key by key
    ///
    /// Nested mappings merge recursively, any other value replaces the base
    /// one, and a null overlay (an empty file) leaves the base untouched.
    fn merge_yaml(base: Value, overlay: Value) -> Value {
        match (base, overlay) {
            (Value::Mapping(mut base), Value::Mapping(overlay)) => {
                for (key, value) in overlay {
                    let merged = match base.remove(&key) {
                        Some(existing) => Self::merge_yaml(existing, value),
                        None => value,
                    };
                    base.insert(key, merged);
                }
                Value::Mapping(base)
            }
            (base, Value::Null) => base,
            (_, overlay) => overlay,
        }
    }

    fn apply_env_overrides(mut config: ResilienceConfig) -> Result<ResilienceConfig> {
        if let Some(val) = env_parse::<u32>("ACTFLOW_MAX_RETRIES", "a non-negative integer")? {
            config.retry.max_retries = val;
        }
        if let Some(val) = env_parse::<f64>("ACTFLOW_BASE_MS", "a number")? {
            config.retry.backoff.base_ms = val;
        }
        if let Some(val) = env_parse::<f64>("ACTFLOW_FACTOR", "a number")? {
            config.retry.backoff.factor = val;
        }
        if let Some(val) = env_parse::<f64>("ACTFLOW_MAX_MS", "a number")? {
            config.retry.backoff.max_ms = val;
        }
        if let Some(val) = env_parse("ACTFLOW_JITTER", "one of none, full, half")? {
            config.retry.backoff.jitter = val;
        }
        if let Some(val) = env_parse("ACTFLOW_DEDUPE_MODE", "one of by-key, latest-wins, none")? {
            config.inflight.mode = val;
        }
        if let Some(val) = env_parse("ACTFLOW_COMMIT_BEHAVIOR", "one of keep, remove")? {
            config.optimistic.commit_behavior = val;
        }
        Ok(config)
    }

    /// Reject backoff settings the retry engine would refuse at call time
    fn validate(config: &ResilienceConfig) -> Result<()> {
        config
            .retry
            .backoff
            .validate()
            .map_err(|e| Error::invalid_config(format!("retry: {}", e)))
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

fn env_parse<T: FromStr>(name: &str, expected: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be {}", name, expected))),
        Err(_) => Ok(None),
    }
}
