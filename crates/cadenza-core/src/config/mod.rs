//! Engine configuration
//!
//! Tunables for the worker pool, progress granularity, instance ceiling,
//! and recording defaults, persisted as YAML. Binding layers typically load
//! one config at process start and hand it to [`crate::engine::Engine`].

mod io;

pub use io::{default_config_path, load_config, save_config};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default ceiling of live instances per kind
pub const DEFAULT_INSTANCE_CEILING: usize = 30;

/// Engine-wide configuration
///
/// Unknown fields in a config file are ignored; missing fields take their
/// defaults, so older files keep loading after upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum live instances per kind (extractors, players, recorders)
    pub max_instances_per_kind: usize,
    /// Worker threads for the shared extraction pool (0 = one per core)
    pub worker_threads: usize,
    /// Below this many output windows an extraction runs single-threaded
    pub parallel_threshold_windows: usize,
    /// Windows per work range; also the cancellation check granularity
    pub windows_per_range: usize,
    /// Minimum progress delta between progress callbacks (fraction of 1.0)
    pub progress_step: f64,
    /// Interval between decibel callbacks while recording, in milliseconds
    pub meter_interval_ms: u64,
    /// Directory for recordings when the caller gives no path
    /// (None = platform audio directory, falling back to the temp dir)
    pub recording_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_instances_per_kind: DEFAULT_INSTANCE_CEILING,
            worker_threads: 0,
            parallel_threshold_windows: 4096,
            windows_per_range: 1024,
            progress_step: 0.01,
            meter_interval_ms: 50,
            recording_dir: None,
        }
    }
}

impl EngineConfig {
    /// Resolve the directory for default-named recordings
    pub fn resolve_recording_dir(&self) -> PathBuf {
        if let Some(dir) = &self.recording_dir {
            return dir.clone();
        }
        dirs::audio_dir().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_instances_per_kind, 30);
        assert_eq!(config.windows_per_range, 1024);
        assert!(config.progress_step > 0.0);
    }

    #[test]
    fn test_partial_yaml_takes_defaults() {
        let config: EngineConfig = serde_yaml::from_str("worker_threads: 4\n").unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.max_instances_per_kind, 30);
    }
}
