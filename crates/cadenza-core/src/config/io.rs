//! Generic configuration I/O
//!
//! YAML load/save that works with any serializable config type. Loading is
//! infallible: a missing or unparsable file logs and falls back to defaults
//! so the engine always starts.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default config file location (platform config dir + `cadenza/engine.yaml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cadenza").join("engine.yaml"))
}

/// Load configuration from a YAML file, falling back to defaults
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("config file {:?} not found, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("failed to parse config {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("failed to read config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("failed to write config {:?}", path))?;

    log::info!("config saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_load_missing_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/engine.yaml"));
        assert_eq!(config.max_instances_per_kind, 30);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");

        let mut config = EngineConfig::default();
        config.worker_threads = 3;
        config.progress_step = 0.05;

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);

        assert_eq!(loaded.worker_threads, 3);
        assert_eq!(loaded.progress_step, 0.05);
    }

    #[test]
    fn test_garbage_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, ": not yaml {{{").unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded.worker_threads, 0);
    }
}
