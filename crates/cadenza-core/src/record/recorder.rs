//! Recorder instance
//!
//! Explicit state machine `Idle → Recording ⇄ Paused → Idle` over the
//! capture session. Captured blocks flow through the sink into a writer
//! thread (16-bit mono WAV); the metering loop keeps its cadence through
//! pauses, emitting the silence floor, so the decibel callback never
//! stutters.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::dispatch::CallbackCell;
use crate::error::{EngineError, EngineResult};
use crate::permission::{PermissionService, PermissionStatus};
use crate::types::{Sample, SessionEvent};

use super::capture::{CaptureBackend, CaptureFactory, CaptureSink};
use super::meter::{MeterState, NormalizationMode, SILENCE_FLOOR_DB};

/// Recording state machine tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecorderState {
    Idle = 0,
    Recording = 1,
    Paused = 2,
}

impl RecorderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RecorderState::Recording,
            2 => RecorderState::Paused,
            _ => RecorderState::Idle,
        }
    }
}

/// Configuration for [`Recorder::start_recording`]
#[derive(Debug, Clone, Default)]
pub struct RecordingConfig {
    /// Output file; None derives a timestamped path in the recording dir
    pub path: Option<PathBuf>,
    /// Level normalization, fixed for the whole session
    pub mode: NormalizationMode,
}

impl RecordingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            mode: NormalizationMode::default(),
        }
    }
}

struct RecordSession {
    backend: Box<dyn CaptureBackend>,
    path: PathBuf,
    writer: Option<JoinHandle<EngineResult<()>>>,
    meter_stop: Arc<AtomicBool>,
    meter_thread: Option<JoinHandle<()>>,
}

/// A live recording instance
pub struct Recorder {
    key: String,
    permission: Arc<dyn PermissionService>,
    capture_factory: Arc<dyn CaptureFactory>,
    recording_dir: PathBuf,
    meter_interval: Duration,
    state: AtomicU8,
    paused: Arc<AtomicBool>,
    meter: Arc<MeterState>,
    mode: Mutex<NormalizationMode>,
    /// Last decibel reading as f64 bits; shared with the metering loop
    last_db_bits: Arc<AtomicU64>,
    on_decibel: Arc<CallbackCell<f64>>,
    session: Mutex<Option<RecordSession>>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Recorder {
    pub(crate) fn new(
        key: String,
        permission: Arc<dyn PermissionService>,
        capture_factory: Arc<dyn CaptureFactory>,
        recording_dir: PathBuf,
        meter_interval: Duration,
    ) -> Self {
        Self {
            key,
            permission,
            capture_factory,
            recording_dir,
            meter_interval,
            state: AtomicU8::new(RecorderState::Idle as u8),
            paused: Arc::new(AtomicBool::new(false)),
            meter: Arc::new(MeterState::new()),
            mode: Mutex::new(NormalizationMode::default()),
            last_db_bits: Arc::new(AtomicU64::new(SILENCE_FLOOR_DB.to_bits())),
            on_decibel: Arc::new(CallbackCell::new("decibel")),
            session: Mutex::new(None),
        }
    }

    /// The registry key this instance was created under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state (lock-free)
    pub fn state(&self) -> RecorderState {
        RecorderState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RecorderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Open a capture session and begin writing
    ///
    /// Permission must already be granted; the check happens before any
    /// platform resource is touched. On any failure the state stays `Idle`
    /// and nothing is left on disk.
    pub fn start_recording(&self, config: RecordingConfig) -> EngineResult<()> {
        if self.state() != RecorderState::Idle {
            return Err(EngineError::ResourceExhausted(
                "recording already in progress".to_string(),
            ));
        }
        if self.permission.status() != PermissionStatus::Granted {
            return Err(EngineError::PermissionDenied(
                "microphone permission not granted".to_string(),
            ));
        }

        let path = self.resolve_path(config.path)?;
        let sample_rate = self.capture_factory.sample_rate();

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| EngineError::InvalidPath(format!("{}: {}", path.display(), e)))?;

        let (frames_tx, frames_rx) = crossbeam::channel::unbounded::<Vec<Sample>>();
        self.paused.store(false, Ordering::Relaxed);
        let sink = CaptureSink::new(frames_tx, Arc::clone(&self.meter), Arc::clone(&self.paused));

        let backend = match self.capture_factory.open(sink) {
            Ok(backend) => backend,
            Err(e) => {
                drop(writer);
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        let writer_thread = std::thread::Builder::new()
            .name(format!("record-writer-{}", self.key))
            .spawn(move || {
                let mut writer = writer;
                while let Ok(block) = frames_rx.recv() {
                    for sample in block {
                        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as Sample) as i16;
                        writer.write_sample(value).map_err(|e| {
                            EngineError::SessionSetupFailed(format!("wav write: {}", e))
                        })?;
                    }
                }
                writer
                    .finalize()
                    .map_err(|e| EngineError::SessionSetupFailed(format!("wav finalize: {}", e)))
            })
            .map_err(|e| EngineError::SessionSetupFailed(format!("writer thread: {}", e)))?;

        *self.mode.lock().expect("mode lock poisoned") = config.mode;
        let meter_stop = Arc::new(AtomicBool::new(false));
        let meter_thread = self.spawn_meter_loop(config.mode, Arc::clone(&meter_stop));

        *self.session.lock().expect("session lock poisoned") = Some(RecordSession {
            backend,
            path: path.clone(),
            writer: Some(writer_thread),
            meter_stop,
            meter_thread,
        });
        self.set_state(RecorderState::Recording);

        log::info!("recorder '{}' writing to {:?}", self.key, path);
        Ok(())
    }

    /// Suspend writing; metering keeps its cadence
    pub fn pause_recording(&self) -> EngineResult<()> {
        if self.state() != RecorderState::Recording {
            return Err(EngineError::NoActiveRecording);
        }
        self.paused.store(true, Ordering::Relaxed);
        self.set_state(RecorderState::Paused);
        Ok(())
    }

    /// Resume writing after a pause
    pub fn resume_recording(&self) -> EngineResult<()> {
        if self.state() != RecorderState::Paused {
            return Err(EngineError::NoActiveRecording);
        }
        self.paused.store(false, Ordering::Relaxed);
        self.set_state(RecorderState::Recording);
        Ok(())
    }

    /// Stop capturing, finalize the WAV, and return its path
    pub fn stop_recording(&self) -> EngineResult<PathBuf> {
        match self.state() {
            RecorderState::Recording | RecorderState::Paused => {}
            RecorderState::Idle => return Err(EngineError::NoActiveRecording),
        }

        let session = self.session.lock().expect("session lock poisoned").take();
        let mut session = session.ok_or(EngineError::NoActiveRecording)?;

        session.meter_stop.store(true, Ordering::Relaxed);
        if let Some(thread) = session.meter_thread.take() {
            let _ = thread.join();
        }

        // Stopping the backend drops the sink, which closes the frame
        // channel and lets the writer run to finalize.
        let stop_result = session.backend.stop();
        drop(session.backend);

        let write_result = session
            .writer
            .take()
            .map(|thread| {
                thread.join().unwrap_or_else(|_| {
                    Err(EngineError::SessionSetupFailed(
                        "writer thread panicked".to_string(),
                    ))
                })
            })
            .unwrap_or(Ok(()));

        self.set_state(RecorderState::Idle);
        stop_result?;
        write_result?;

        log::info!("recorder '{}' finalized {:?}", self.key, session.path);
        Ok(session.path)
    }

    /// Compute one decibel reading on demand
    pub fn decibel(&self) -> EngineResult<f64> {
        if self.state() == RecorderState::Idle {
            return Err(EngineError::NoActiveRecording);
        }
        let db = if self.paused.load(Ordering::Relaxed) {
            SILENCE_FLOOR_DB
        } else {
            self.meter
                .decibel(*self.mode.lock().expect("mode lock poisoned"))
        };
        self.last_db_bits.store(db.to_bits(), Ordering::Relaxed);
        Ok(db)
    }

    /// Last reading delivered by the metering loop (lock-free)
    pub fn last_decibel(&self) -> f64 {
        f64::from_bits(self.last_db_bits.load(Ordering::Relaxed))
    }

    /// Register the periodic decibel callback
    pub fn on_decibel_update(&self, callback: impl Fn(f64) + Send + 'static) {
        self.on_decibel.set(callback);
    }

    /// Remove the decibel callback
    pub fn clear_on_decibel_update(&self) {
        self.on_decibel.clear();
    }

    /// Map a platform session event onto a pause transition
    pub fn handle_session_event(&self, event: SessionEvent) {
        if self.state() == RecorderState::Recording {
            log::info!("recorder '{}' pausing on {:?}", self.key, event);
            let _ = self.pause_recording();
        }
    }

    fn resolve_path(&self, path: Option<PathBuf>) -> EngineResult<PathBuf> {
        match path {
            Some(path) => {
                let parent = path.parent().unwrap_or(Path::new(""));
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    return Err(EngineError::InvalidPath(format!(
                        "directory {:?} does not exist",
                        parent
                    )));
                }
                Ok(path)
            }
            None => {
                std::fs::create_dir_all(&self.recording_dir).map_err(|e| {
                    EngineError::InvalidPath(format!("{:?}: {}", self.recording_dir, e))
                })?;
                let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
                Ok(self
                    .recording_dir
                    .join(format!("recording-{}-{}.wav", self.key, stamp)))
            }
        }
    }

    fn spawn_meter_loop(
        &self,
        mode: NormalizationMode,
        stop: Arc<AtomicBool>,
    ) -> Option<JoinHandle<()>> {
        let meter = Arc::clone(&self.meter);
        let paused = Arc::clone(&self.paused);
        let on_decibel = Arc::clone(&self.on_decibel);
        let last_db_bits = Arc::clone(&self.last_db_bits);
        let interval = self.meter_interval;

        std::thread::Builder::new()
            .name(format!("record-meter-{}", self.key))
            .spawn(move || loop {
                std::thread::sleep(interval);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let db = if paused.load(Ordering::Relaxed) {
                    SILENCE_FLOOR_DB
                } else {
                    meter.decibel(mode)
                };
                last_db_bits.store(db.to_bits(), Ordering::Relaxed);
                on_decibel.invoke(db);
            })
            .map_err(|e| log::error!("failed to spawn meter loop: {}", e))
            .ok()
    }

    /// Stop any active session; called on destroy
    pub(crate) fn shutdown(&self) {
        if self.state() != RecorderState::Idle {
            if let Err(e) = self.stop_recording() {
                log::warn!("recorder '{}' shutdown: {}", self.key, e);
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}
