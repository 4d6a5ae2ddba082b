//! Engine facade
//!
//! One explicitly constructed object owns the three instance registries,
//! the shared extraction worker pool, and the collaborator handles. The
//! binding layer holds it for the process lifetime and calls `shutdown`
//! on teardown; there is no ambient global state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::decode::{Decoder, SymphoniaDecoder};
use crate::error::{EngineError, EngineResult};
use crate::permission::{AlwaysGranted, PermissionService};
use crate::playback::{CpalOutputFactory, OutputFactory, Player};
use crate::record::{CaptureFactory, CpalCaptureFactory, Recorder};
use crate::registry::Registry;
use crate::types::{InstanceKind, SessionEvent};
use crate::waveform::{Extractor, PipelineTuning};

/// Builder for an [`Engine`] with swapped collaborators
///
/// Defaults: symphonia decoding, cpal output and capture on the default
/// devices, permission always granted. Headless hosts and tests substitute
/// the null/synthetic backends.
pub struct EngineBuilder {
    config: EngineConfig,
    decoder: Arc<dyn Decoder>,
    output_factory: Arc<dyn OutputFactory>,
    capture_factory: Arc<dyn CaptureFactory>,
    permission: Arc<dyn PermissionService>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            decoder: Arc::new(SymphoniaDecoder),
            output_factory: Arc::new(CpalOutputFactory::new()),
            capture_factory: Arc::new(CpalCaptureFactory::new()),
            permission: Arc::new(AlwaysGranted),
        }
    }

    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn output_factory(mut self, factory: Arc<dyn OutputFactory>) -> Self {
        self.output_factory = factory;
        self
    }

    pub fn capture_factory(mut self, factory: Arc<dyn CaptureFactory>) -> Self {
        self.capture_factory = factory;
        self
    }

    pub fn permission(mut self, permission: Arc<dyn PermissionService>) -> Self {
        self.permission = permission;
        self
    }

    pub fn build(self) -> EngineResult<Engine> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads)
            .thread_name(|i| format!("waveform-worker-{}", i))
            .build()
            .map_err(|e| EngineError::SessionSetupFailed(format!("worker pool: {}", e)))?;

        let ceiling = self.config.max_instances_per_kind;
        Ok(Engine {
            tuning: PipelineTuning {
                windows_per_range: self.config.windows_per_range,
                parallel_threshold: self.config.parallel_threshold_windows,
                progress_step: self.config.progress_step,
            },
            meter_interval: Duration::from_millis(self.config.meter_interval_ms),
            recording_dir: self.config.resolve_recording_dir(),
            pool: Arc::new(pool),
            decoder: self.decoder,
            output_factory: self.output_factory,
            capture_factory: self.capture_factory,
            permission: self.permission,
            extractors: Registry::new(InstanceKind::Extractor, ceiling),
            players: Registry::new(InstanceKind::Player, ceiling),
            recorders: Registry::new(InstanceKind::Recorder, ceiling),
        })
    }
}

/// The audio engine: registries, worker pool, and collaborators
pub struct Engine {
    tuning: PipelineTuning,
    meter_interval: Duration,
    recording_dir: PathBuf,
    pool: Arc<rayon::ThreadPool>,
    decoder: Arc<dyn Decoder>,
    output_factory: Arc<dyn OutputFactory>,
    capture_factory: Arc<dyn CaptureFactory>,
    permission: Arc<dyn PermissionService>,
    extractors: Registry<Extractor>,
    players: Registry<Player>,
    recorders: Registry<Recorder>,
}

impl Engine {
    /// Engine with default collaborators
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        EngineBuilder::new(config).build()
    }

    /// Builder for swapping collaborators
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    // --- Extractors ---

    /// Create a waveform extractor under `key`
    pub fn create_extractor(&self, key: &str) -> EngineResult<Arc<Extractor>> {
        self.extractors.insert_with(key, || {
            Ok(Extractor::new(
                key.to_string(),
                Arc::clone(&self.decoder),
                Arc::clone(&self.pool),
                self.tuning.clone(),
            ))
        })
    }

    /// Look up a live extractor
    pub fn extractor(&self, key: &str) -> Option<Arc<Extractor>> {
        self.extractors.get(key)
    }

    /// Cancel in-flight work and release the extractor; no-op if absent
    pub fn destroy_extractor(&self, key: &str) {
        if let Some(extractor) = self.extractors.remove(key) {
            extractor.shutdown();
        }
    }

    /// Cancel and release every extractor
    pub fn stop_all_extractors(&self) -> EngineResult<()> {
        self.extractors.stop_all(|_, extractor| {
            extractor.shutdown();
            Ok(())
        })
    }

    // --- Players ---

    /// Create a player under `key`
    pub fn create_player(&self, key: &str) -> EngineResult<Arc<Player>> {
        self.players.insert_with(key, || {
            Ok(Player::new(
                key.to_string(),
                Arc::clone(&self.decoder),
                Arc::clone(&self.output_factory),
            ))
        })
    }

    /// Look up a live player
    pub fn player(&self, key: &str) -> Option<Arc<Player>> {
        self.players.get(key)
    }

    /// Release the player and its session; no-op if absent
    pub fn destroy_player(&self, key: &str) {
        if let Some(player) = self.players.remove(key) {
            player.shutdown();
        }
    }

    /// Stop and release every player
    pub fn stop_all_players(&self) -> EngineResult<()> {
        self.players.stop_all(|_, player| {
            let stopped = match player.stop() {
                Ok(()) | Err(EngineError::NotPrepared) => Ok(()),
                Err(e) => Err(e),
            };
            player.shutdown();
            stopped
        })
    }

    // --- Recorders ---

    /// Create a recorder under `key`
    pub fn create_recorder(&self, key: &str) -> EngineResult<Arc<Recorder>> {
        self.recorders.insert_with(key, || {
            Ok(Recorder::new(
                key.to_string(),
                Arc::clone(&self.permission),
                Arc::clone(&self.capture_factory),
                self.recording_dir.clone(),
                self.meter_interval,
            ))
        })
    }

    /// Look up a live recorder
    pub fn recorder(&self, key: &str) -> Option<Arc<Recorder>> {
        self.recorders.get(key)
    }

    /// Finalize any active session and release the recorder; no-op if absent
    pub fn destroy_recorder(&self, key: &str) {
        if let Some(recorder) = self.recorders.remove(key) {
            recorder.shutdown();
        }
    }

    /// Stop and release every recorder, finalizing active sessions
    pub fn stop_all_recorders(&self) -> EngineResult<()> {
        self.recorders.stop_all(|_, recorder| {
            match recorder.stop_recording() {
                Ok(_) | Err(EngineError::NoActiveRecording) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    // --- Session events / lifecycle ---

    /// Fan a platform session event out to all live players and recorders
    pub fn handle_session_event(&self, event: SessionEvent) {
        for player in self.players.values() {
            player.handle_session_event(event);
        }
        for recorder in self.recorders.values() {
            recorder.handle_session_event(event);
        }
    }

    /// Stop and release every instance of every kind
    ///
    /// All kinds are attempted; the first failure is reported after the
    /// sweep completes.
    pub fn shutdown(&self) -> EngineResult<()> {
        log::info!(
            "engine shutdown: {} extractors, {} players, {} recorders live",
            self.extractors.len(),
            self.players.len(),
            self.recorders.len()
        );
        let extractors = self.stop_all_extractors();
        let players = self.stop_all_players();
        let recorders = self.stop_all_recorders();
        extractors.and(players).and(recorders)
    }
}
