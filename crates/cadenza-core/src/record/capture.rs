//! Capture backends
//!
//! Mirrors the playback output design: the platform input stream lives on
//! its own thread (cpal streams are not `Send`) and feeds captured blocks
//! into a [`CaptureSink`]. The sink always updates the meter; frames are
//! forwarded to the writer only while the session is not paused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::{EngineError, EngineResult};
use crate::types::{Sample, DEFAULT_SAMPLE_RATE};

use super::meter::MeterState;

/// Destination for captured mono blocks
pub struct CaptureSink {
    frames_tx: crossbeam::channel::Sender<Vec<Sample>>,
    meter: Arc<MeterState>,
    paused: Arc<AtomicBool>,
}

impl CaptureSink {
    pub(crate) fn new(
        frames_tx: crossbeam::channel::Sender<Vec<Sample>>,
        meter: Arc<MeterState>,
        paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            frames_tx,
            meter,
            paused,
        }
    }

    /// Deliver one captured block (mono samples)
    pub fn push(&self, block: &[Sample]) {
        self.meter.update(block);
        if !self.paused.load(Ordering::Relaxed) {
            let _ = self.frames_tx.send(block.to_vec());
        }
    }
}

/// A live capture session
pub trait CaptureBackend: Send {
    /// Stop capturing and release the platform session
    fn stop(&mut self) -> EngineResult<()>;
}

/// Opens capture sessions; one factory is shared by all recorders
pub trait CaptureFactory: Send + Sync {
    /// Rate captured audio (and the output WAV) is produced at
    fn sample_rate(&self) -> u32;
    fn open(&self, sink: CaptureSink) -> EngineResult<Box<dyn CaptureBackend>>;
}

// ============================================================================
// CPAL backend
// ============================================================================

/// Default-device cpal capture
pub struct CpalCaptureFactory {
    sample_rate: u32,
}

impl CpalCaptureFactory {
    /// Probe the default input device for its preferred rate
    pub fn new() -> Self {
        let sample_rate = cpal::default_host()
            .default_input_device()
            .and_then(|d| d.default_input_config().ok())
            .map(|c| c.sample_rate().0)
            .unwrap_or(DEFAULT_SAMPLE_RATE);
        Self { sample_rate }
    }
}

impl Default for CpalCaptureFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureFactory for CpalCaptureFactory {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&self, sink: CaptureSink) -> EngineResult<Box<dyn CaptureBackend>> {
        CpalCapture::open(sink, self.sample_rate).map(|b| Box::new(b) as Box<dyn CaptureBackend>)
    }
}

/// Handle to a cpal input stream owned by its builder thread
pub struct CpalCapture {
    shutdown_tx: crossbeam::channel::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCapture {
    fn open(sink: CaptureSink, sample_rate: u32) -> EngineResult<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded(1);
        let (setup_tx, setup_rx) = crossbeam::channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name("record-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(sink, sample_rate) {
                    Ok(stream) => {
                        let _ = setup_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = setup_tx.send(Err(e));
                        return;
                    }
                };

                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| EngineError::SessionSetupFailed(format!("capture thread: {}", e)))?;

        setup_rx
            .recv()
            .map_err(|_| EngineError::SessionSetupFailed("capture thread died".to_string()))??;

        Ok(Self {
            shutdown_tx,
            thread: Some(thread),
        })
    }
}

fn build_input_stream(sink: CaptureSink, sample_rate: u32) -> EngineResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| EngineError::SessionSetupFailed("no input device".to_string()))?;

    let channels = device
        .default_input_config()
        .map(|c| c.channels())
        .unwrap_or(1)
        .max(1);

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[Sample], _| {
                if channels == 1 {
                    sink.push(data);
                } else {
                    // Downmix interleaved input to mono
                    let mono: Vec<Sample> = data
                        .chunks_exact(channels as usize)
                        .map(|frame| frame.iter().sum::<Sample>() / channels as Sample)
                        .collect();
                    sink.push(&mono);
                }
            },
            |e| log::warn!("input stream error: {}", e),
            None,
        )
        .map_err(|e| EngineError::SessionSetupFailed(format!("build input stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| EngineError::SessionSetupFailed(format!("start input stream: {}", e)))?;

    Ok(stream)
}

impl CaptureBackend for CpalCapture {
    fn stop(&mut self) -> EngineResult<()> {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ============================================================================
// Synthetic backend (headless/CI)
// ============================================================================

/// Deviceless capture producing a steady sine at a fixed amplitude
pub struct SyntheticCaptureFactory {
    sample_rate: u32,
    amplitude: Sample,
}

impl SyntheticCaptureFactory {
    pub fn new(amplitude: Sample) -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            amplitude,
        }
    }
}

impl CaptureFactory for SyntheticCaptureFactory {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&self, sink: CaptureSink) -> EngineResult<Box<dyn CaptureBackend>> {
        Ok(Box::new(SyntheticCapture::open(
            sink,
            self.sample_rate,
            self.amplitude,
        )))
    }
}

/// Timer-driven capture session generating 20 ms blocks
pub struct SyntheticCapture {
    shutdown_tx: crossbeam::channel::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SyntheticCapture {
    fn open(sink: CaptureSink, sample_rate: u32, amplitude: Sample) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name("record-synthetic".to_string())
            .spawn(move || {
                let block_frames = sample_rate as usize / 50;
                let mut phase = 0.0f32;
                let step = 2.0 * std::f32::consts::PI * 440.0 / sample_rate as f32;

                loop {
                    match shutdown_rx.recv_timeout(Duration::from_millis(20)) {
                        Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                        Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                    }

                    let block: Vec<Sample> = (0..block_frames)
                        .map(|_| {
                            phase += step;
                            phase.sin() * amplitude
                        })
                        .collect();
                    sink.push(&block);
                }
            })
            .expect("failed to spawn synthetic capture thread");

        Self {
            shutdown_tx,
            thread: Some(thread),
        }
    }
}

impl CaptureBackend for SyntheticCapture {
    fn stop(&mut self) -> EngineResult<()> {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_meters_while_paused_but_drops_frames() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let meter = Arc::new(MeterState::new());
        let paused = Arc::new(AtomicBool::new(true));
        let sink = CaptureSink::new(tx, Arc::clone(&meter), Arc::clone(&paused));

        sink.push(&[0.5, -0.5]);
        assert!(rx.try_recv().is_err());
        assert!(meter.peak() > 0.4);

        paused.store(false, Ordering::Relaxed);
        sink.push(&[0.25; 8]);
        assert_eq!(rx.try_recv().unwrap().len(), 8);
    }

    #[test]
    fn test_synthetic_capture_produces_blocks() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let meter = Arc::new(MeterState::new());
        let paused = Arc::new(AtomicBool::new(false));
        let sink = CaptureSink::new(tx, Arc::clone(&meter), paused);

        let mut backend = SyntheticCapture::open(sink, 44100, 0.5);
        std::thread::sleep(Duration::from_millis(100));
        backend.stop().unwrap();

        let blocks: Vec<_> = rx.try_iter().collect();
        assert!(!blocks.is_empty());
        assert!(meter.peak() > 0.4);
    }
}
