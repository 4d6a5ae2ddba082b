//! Extractor instance
//!
//! One extraction job runs at a time per instance; the job owns its cancel
//! flag and progress counter exclusively. The job thread decodes, runs the
//! pipeline on the shared pool, and delivers the result through a oneshot
//! ticket, with progress pushed through the instance's callback cell.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::decode::Decoder;
use crate::dispatch::CallbackCell;
use crate::error::{EngineError, EngineResult};

use super::pipeline::{self, PipelineTuning};
use super::{ExtractionConfig, WaveformData};

/// Completion handle for an in-flight extraction
pub struct ExtractionTicket {
    rx: tokio::sync::oneshot::Receiver<EngineResult<WaveformData>>,
}

impl std::fmt::Debug for ExtractionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionTicket").finish_non_exhaustive()
    }
}

impl ExtractionTicket {
    /// Block until the job resolves
    pub fn wait(self) -> EngineResult<WaveformData> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(EngineError::SessionSetupFailed(
                "extraction worker terminated".to_string(),
            )))
    }
}

struct Job {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// A live waveform extractor instance
pub struct Extractor {
    key: String,
    decoder: Arc<dyn Decoder>,
    pool: Arc<rayon::ThreadPool>,
    tuning: PipelineTuning,
    on_progress: Arc<CallbackCell<f64>>,
    /// Last reported progress as f64 bits, for the lock-free getter
    progress_bits: Arc<AtomicU64>,
    busy: Arc<AtomicBool>,
    job: Mutex<Option<Job>>,
}

impl Extractor {
    pub(crate) fn new(
        key: String,
        decoder: Arc<dyn Decoder>,
        pool: Arc<rayon::ThreadPool>,
        tuning: PipelineTuning,
    ) -> Self {
        Self {
            key,
            decoder,
            pool,
            tuning,
            on_progress: Arc::new(CallbackCell::new("progress")),
            progress_bits: Arc::new(AtomicU64::new(0)),
            busy: Arc::new(AtomicBool::new(false)),
            job: Mutex::new(None),
        }
    }

    /// The registry key this instance was created under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Start an extraction job
    ///
    /// Rejects with `ResourceExhausted` while a job is in flight; the
    /// returned ticket resolves when the job completes, is cancelled, or
    /// fails.
    pub fn extract(&self, config: ExtractionConfig) -> EngineResult<ExtractionTicket> {
        config.validate()?;

        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(EngineError::ResourceExhausted(
                "extraction already in progress".to_string(),
            ));
        }
        self.progress_bits.store(0f64.to_bits(), Ordering::Relaxed);

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = tokio::sync::oneshot::channel();

        let decoder = Arc::clone(&self.decoder);
        let pool = Arc::clone(&self.pool);
        let tuning = self.tuning.clone();
        let on_progress = Arc::clone(&self.on_progress);
        let progress_bits = Arc::clone(&self.progress_bits);
        let busy = Arc::clone(&self.busy);
        let job_cancel = Arc::clone(&cancel);

        let thread = std::thread::Builder::new()
            .name(format!("waveform-{}", self.key))
            .spawn(move || {
                let result = decoder.decode(&config.path).and_then(|audio| {
                    pipeline::run(&audio, &config, &pool, &tuning, &job_cancel, &|fraction| {
                        progress_bits.store(fraction.to_bits(), Ordering::Relaxed);
                        on_progress.invoke(fraction);
                    })
                });

                if let Err(e) = &result {
                    log::debug!("extraction resolved with failure: {}", e);
                }

                busy.store(false, Ordering::Release);
                let _ = tx.send(result);
            })
            .map_err(|e| {
                self.busy.store(false, Ordering::Release);
                EngineError::SessionSetupFailed(format!("failed to spawn extraction thread: {}", e))
            })?;

        *self.job.lock().expect("job lock poisoned") = Some(Job {
            cancel,
            thread: Some(thread),
        });

        Ok(ExtractionTicket { rx })
    }

    /// Request cooperative cancellation of the in-flight job
    ///
    /// No-op when idle. Workers observe the flag at window-range
    /// granularity and the job resolves as `Cancelled`.
    pub fn cancel(&self) {
        if let Some(job) = self.job.lock().expect("job lock poisoned").as_ref() {
            job.cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Register the progress callback
    pub fn on_progress(&self, callback: impl Fn(f64) + Send + 'static) {
        self.on_progress.set(callback);
    }

    /// Remove the progress callback
    pub fn clear_on_progress(&self) {
        self.on_progress.clear();
    }

    /// Last reported progress in [0, 1] (lock-free)
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    /// Check whether a job is in flight (lock-free)
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Cancel any in-flight job and wait for it to unwind
    ///
    /// Called on destroy so buffers are released before the instance is
    /// dropped from the registry.
    pub(crate) fn shutdown(&self) {
        let job = self.job.lock().expect("job lock poisoned").take();
        if let Some(mut job) = job {
            job.cancel.store(true, Ordering::Relaxed);
            if let Some(thread) = job.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for Extractor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
