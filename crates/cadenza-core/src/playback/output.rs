//! Output backends and the shared render path
//!
//! The audio callback and the control surface communicate exclusively
//! through [`RenderState`] atomics: the callback pulls interleaved frames
//! and advances the read head; controls store volume/speed/position and
//! never block the callback. Platform streams are owned by a dedicated
//! thread because cpal streams are not `Send`; the backend handle only
//! carries the command channel.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::{EngineError, EngineResult};
use crate::types::{frames_to_ms, ms_to_frames, Sample, DEFAULT_SAMPLE_RATE};

/// Shared state between a playback session's controls and its renderer
pub struct RenderState {
    planes: Vec<Vec<Sample>>,
    sample_rate: u32,
    frames: usize,
    /// Fractional read head in frames, stored as f64 bits
    pos_bits: AtomicU64,
    volume_bits: AtomicU32,
    speed_bits: AtomicU32,
    playing: AtomicBool,
    looping: AtomicBool,
    finished: AtomicBool,
}

impl RenderState {
    pub fn new(planes: Vec<Vec<Sample>>, sample_rate: u32) -> Self {
        let frames = planes.first().map(Vec::len).unwrap_or(0);
        Self {
            planes,
            sample_rate,
            frames,
            pos_bits: AtomicU64::new(0f64.to_bits()),
            volume_bits: AtomicU32::new(1f32.to_bits()),
            speed_bits: AtomicU32::new(1f32.to_bits()),
            playing: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn duration_ms(&self) -> u64 {
        frames_to_ms(self.frames as u64, self.sample_rate)
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    pub fn set_speed(&self, speed: f32) {
        self.speed_bits.store(speed.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    /// Consume the end-of-media flag set by the render path
    pub fn take_finished(&self) -> bool {
        self.finished.swap(false, Ordering::AcqRel)
    }

    pub fn position_ms(&self) -> u64 {
        let pos = f64::from_bits(self.pos_bits.load(Ordering::Relaxed));
        frames_to_ms(pos as u64, self.sample_rate)
    }

    pub fn set_position_ms(&self, ms: u64) {
        let frames = (ms_to_frames(ms, self.sample_rate) as f64).min(self.frames as f64);
        self.pos_bits.store(frames.to_bits(), Ordering::Relaxed);
    }

    /// Fill `out` with interleaved frames and advance the read head
    ///
    /// Applies volume and speed (fractional read head with linear
    /// interpolation). At end-of-media the looping flag decides between
    /// wrapping to zero and latching `finished` + clearing `playing`.
    /// A concurrent seek can lose at most one callback buffer of
    /// advancement; the seek's store wins.
    pub fn render(&self, out: &mut [Sample], out_channels: usize) {
        out.fill(0.0);
        if !self.is_playing() || self.frames == 0 || out_channels == 0 {
            return;
        }

        let volume = self.volume();
        let speed = self.speed() as f64;
        let looping = self.looping.load(Ordering::Relaxed);
        let mut pos = f64::from_bits(self.pos_bits.load(Ordering::Relaxed));

        for frame in out.chunks_exact_mut(out_channels) {
            if pos >= self.frames as f64 {
                if looping {
                    pos %= self.frames as f64;
                } else {
                    self.finished.store(true, Ordering::Release);
                    self.playing.store(false, Ordering::Relaxed);
                    break;
                }
            }

            let idx = pos as usize;
            let next = (idx + 1).min(self.frames - 1);
            let frac = (pos - idx as f64) as f32;

            for (ch, slot) in frame.iter_mut().enumerate() {
                let plane = &self.planes[ch.min(self.planes.len() - 1)];
                let sample = plane[idx] + (plane[next] - plane[idx]) * frac;
                *slot = sample * volume;
            }

            pos += speed;
        }

        self.pos_bits.store(pos.min(self.frames as f64).to_bits(), Ordering::Relaxed);
    }
}

/// A live output session holding the platform resources for one player
pub trait OutputBackend: Send {
    /// Activate output (the render gate is the `playing` flag)
    fn start(&mut self) -> EngineResult<()>;
    /// Deactivate output without releasing the session
    fn pause(&mut self) -> EngineResult<()>;
    /// Release the session
    fn stop(&mut self) -> EngineResult<()>;
}

/// Opens output sessions; one factory is shared by all players
pub trait OutputFactory: Send + Sync {
    /// Rate sessions will render at; prepare resamples decoded audio to it
    fn sample_rate(&self) -> u32;
    fn open(&self, state: Arc<RenderState>) -> EngineResult<Box<dyn OutputBackend>>;
}

// ============================================================================
// CPAL backend
// ============================================================================

enum StreamCommand {
    Shutdown,
}

/// Default-device cpal output
pub struct CpalOutputFactory {
    sample_rate: u32,
}

impl CpalOutputFactory {
    /// Probe the default output device for its preferred rate
    pub fn new() -> Self {
        let sample_rate = cpal::default_host()
            .default_output_device()
            .and_then(|d| d.default_output_config().ok())
            .map(|c| c.sample_rate().0)
            .unwrap_or(DEFAULT_SAMPLE_RATE);
        Self { sample_rate }
    }
}

impl Default for CpalOutputFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFactory for CpalOutputFactory {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&self, state: Arc<RenderState>) -> EngineResult<Box<dyn OutputBackend>> {
        CpalOutput::open(state, self.sample_rate).map(|b| Box::new(b) as Box<dyn OutputBackend>)
    }
}

/// Handle to a cpal stream owned by its builder thread
pub struct CpalOutput {
    command_tx: crossbeam::channel::Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    fn open(state: Arc<RenderState>, sample_rate: u32) -> EngineResult<Self> {
        let (command_tx, command_rx) = crossbeam::channel::unbounded();
        let (setup_tx, setup_rx) = crossbeam::channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || {
                let stream = match build_stream(&state, sample_rate) {
                    Ok(stream) => {
                        let _ = setup_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = setup_tx.send(Err(e));
                        return;
                    }
                };

                // Keep the stream alive until shutdown; the playing flag
                // gates whether it emits audio or silence.
                while let Ok(cmd) = command_rx.recv() {
                    match cmd {
                        StreamCommand::Shutdown => break,
                    }
                }
                drop(stream);
            })
            .map_err(|e| EngineError::SessionSetupFailed(format!("output thread: {}", e)))?;

        setup_rx
            .recv()
            .map_err(|_| EngineError::SessionSetupFailed("output thread died".to_string()))??;

        Ok(Self {
            command_tx,
            thread: Some(thread),
        })
    }
}

fn build_stream(state: &Arc<RenderState>, sample_rate: u32) -> EngineResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| EngineError::SessionSetupFailed("no output device".to_string()))?;

    let channels = state.channels().clamp(1, 2) as u16;
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let render_state = Arc::clone(state);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [Sample], _| {
                render_state.render(data, channels as usize);
            },
            |e| log::warn!("output stream error: {}", e),
            None,
        )
        .map_err(|e| EngineError::SessionSetupFailed(format!("build output stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| EngineError::SessionSetupFailed(format!("start output stream: {}", e)))?;

    Ok(stream)
}

impl OutputBackend for CpalOutput {
    fn start(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        let _ = self.command_tx.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ============================================================================
// Null backend (headless/CI)
// ============================================================================

/// Output factory with no device: a timer thread consumes frames in real
/// time (scaled by `rate_multiplier`), driving positions and end-of-media
/// exactly like a device callback would
pub struct NullOutputFactory {
    sample_rate: u32,
    rate_multiplier: f64,
}

impl NullOutputFactory {
    pub fn new() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            rate_multiplier: 1.0,
        }
    }

    /// Consume frames at `multiplier` times real time
    pub fn with_rate_multiplier(multiplier: f64) -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            rate_multiplier: multiplier,
        }
    }
}

impl Default for NullOutputFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFactory for NullOutputFactory {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&self, state: Arc<RenderState>) -> EngineResult<Box<dyn OutputBackend>> {
        Ok(Box::new(NullOutput::open(state, self.rate_multiplier)))
    }
}

/// Deviceless output session
pub struct NullOutput {
    shutdown_tx: crossbeam::channel::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl NullOutput {
    fn open(state: Arc<RenderState>, rate_multiplier: f64) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name("playback-null".to_string())
            .spawn(move || {
                let channels = state.channels().max(1);
                let rate = state.sample_rate() as f64 * rate_multiplier;
                let mut scratch = vec![0.0f32; state.sample_rate() as usize * channels];
                let mut last = Instant::now();

                loop {
                    match shutdown_rx.recv_timeout(Duration::from_millis(10)) {
                        Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                        Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                    }

                    let now = Instant::now();
                    let frames = ((now - last).as_secs_f64() * rate) as usize;
                    last = now;

                    let frames = frames.min(scratch.len() / channels);
                    if frames > 0 {
                        state.render(&mut scratch[..frames * channels], channels);
                    }
                }
            })
            .expect("failed to spawn null output thread");

        Self {
            shutdown_tx,
            thread: Some(thread),
        }
    }
}

impl OutputBackend for NullOutput {
    fn start(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
