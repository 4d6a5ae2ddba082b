//! Window reduction pipeline
//!
//! Each window keeps its min/max sample pair; the published amplitude is
//! the pair member with the larger magnitude, sign preserved, so transient
//! polarity survives downsampling. Windows are grouped into contiguous
//! ranges; above the parallel threshold the ranges run on the shared
//! worker pool and merge in window order. The cancel flag is checked once
//! per range, bounding cancellation latency to one range's work.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::types::DecodedAudio;

use super::{ExtractionConfig, WaveformData};

/// Tunables lifted from the engine config
#[derive(Debug, Clone)]
pub(crate) struct PipelineTuning {
    /// Windows per work range (and per cancellation check)
    pub windows_per_range: usize,
    /// Below this many windows per channel the job stays single-threaded
    pub parallel_threshold: usize,
    /// Minimum fraction between two progress reports
    pub progress_step: f64,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            windows_per_range: 1024,
            parallel_threshold: 4096,
            progress_step: 0.01,
        }
    }
}

/// Progress accumulator shared by all workers of one job
///
/// Workers bump the window counter; the report callback only fires when
/// the fraction crosses `step`, and the delivery lock keeps reported
/// values monotone regardless of worker interleaving.
struct ProgressSink<'a> {
    completed: AtomicUsize,
    total: usize,
    step: f64,
    last: Mutex<f64>,
    report: &'a (dyn Fn(f64) + Sync),
}

impl<'a> ProgressSink<'a> {
    fn new(total: usize, step: f64, report: &'a (dyn Fn(f64) + Sync)) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total: total.max(1),
            step,
            last: Mutex::new(0.0),
            report,
        }
    }

    /// Record `windows` more completed windows
    fn add(&self, windows: usize) {
        let done = self.completed.fetch_add(windows, Ordering::Relaxed) + windows;
        let fraction = done as f64 / self.total as f64;

        let mut last = self.last.lock().expect("progress lock poisoned");
        // 1.0 is reserved for finish() so nothing is reported past a
        // cancellation observed by a later range.
        if fraction - *last >= self.step && fraction < 1.0 {
            *last = fraction;
            (self.report)(fraction);
        }
    }

    /// Report the terminal 1.0 (success path only)
    fn finish(&self) {
        let mut last = self.last.lock().expect("progress lock poisoned");
        if *last < 1.0 {
            *last = 1.0;
            (self.report)(1.0);
        }
    }
}

/// Run the full extract→downsample→normalize pipeline
pub(crate) fn run(
    audio: &DecodedAudio,
    config: &ExtractionConfig,
    pool: &rayon::ThreadPool,
    tuning: &PipelineTuning,
    cancel: &AtomicBool,
    report: &(dyn Fn(f64) + Sync),
) -> EngineResult<WaveformData> {
    let frames = audio.frames();
    let spp = config.samples_per_pixel;
    let windows = frames.div_ceil(spp);

    let sink = ProgressSink::new(windows * audio.channels().max(1), tuning.progress_step, report);

    let mut channels = Vec::with_capacity(audio.channels());
    for plane in &audio.planes {
        channels.push(reduce_plane(plane, spp, windows, pool, tuning, cancel, &sink)?);
    }

    finalize(&mut channels, config);
    sink.finish();

    Ok(WaveformData {
        channels,
        samples_per_pixel: spp,
        source_frames: frames,
        source_sample_rate: audio.sample_rate,
    })
}

/// Reduce one channel plane to its per-window amplitudes
fn reduce_plane(
    plane: &[f32],
    spp: usize,
    windows: usize,
    pool: &rayon::ThreadPool,
    tuning: &PipelineTuning,
    cancel: &AtomicBool,
    sink: &ProgressSink<'_>,
) -> EngineResult<Vec<f32>> {
    let ranges = window_ranges(windows, tuning.windows_per_range);

    let parts: Vec<Vec<f32>> = if windows < tuning.parallel_threshold {
        let mut parts = Vec::with_capacity(ranges.len());
        for range in ranges {
            parts.push(reduce_range(plane, spp, range, cancel, sink)?);
        }
        parts
    } else {
        pool.install(|| {
            ranges
                .into_par_iter()
                .map(|range| reduce_range(plane, spp, range, cancel, sink))
                .collect::<EngineResult<Vec<_>>>()
        })?
    };

    let mut out = Vec::new();
    out.try_reserve_exact(windows)
        .map_err(|_| EngineError::OutOfMemory(format!("{} output points", windows)))?;
    for part in parts {
        out.extend_from_slice(&part);
    }
    Ok(out)
}

/// Partition `windows` into contiguous ranges of at most `per_range`
fn window_ranges(windows: usize, per_range: usize) -> Vec<Range<usize>> {
    let per_range = per_range.max(1);
    (0..windows)
        .step_by(per_range)
        .map(|start| start..(start + per_range).min(windows))
        .collect()
}

/// Reduce one contiguous window range
fn reduce_range(
    plane: &[f32],
    spp: usize,
    range: Range<usize>,
    cancel: &AtomicBool,
    sink: &ProgressSink<'_>,
) -> EngineResult<Vec<f32>> {
    if cancel.load(Ordering::Relaxed) {
        return Err(EngineError::Cancelled);
    }

    let count = range.len();
    let mut out = Vec::with_capacity(count);

    for window in range {
        let start = window * spp;
        let end = (start + spp).min(plane.len());

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &sample in &plane[start..end] {
            min = min.min(sample);
            max = max.max(sample);
        }
        if min.is_infinite() {
            min = 0.0;
        }
        if max.is_infinite() {
            max = 0.0;
        }

        // Larger-magnitude member of the min/max pair, sign preserved
        out.push(if max.abs() >= min.abs() { max } else { min });
    }

    sink.add(count);
    Ok(out)
}

/// Apply normalization, clipping, and the post-normalization threshold
fn finalize(channels: &mut [Vec<f32>], config: &ExtractionConfig) {
    if config.normalize {
        let max_abs = channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |acc, &v| acc.max(v.abs()));
        if max_abs > 0.0 {
            let factor = config.scale / max_abs;
            for channel in channels.iter_mut() {
                for v in channel.iter_mut() {
                    *v = (*v * factor).clamp(-1.0, 1.0);
                }
            }
        }
    } else {
        for channel in channels.iter_mut() {
            for v in channel.iter_mut() {
                *v = v.clamp(-1.0, 1.0);
            }
        }
    }

    if config.threshold > 0.0 {
        for channel in channels.iter_mut() {
            for v in channel.iter_mut() {
                if v.abs() < config.threshold {
                    *v = 0.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn test_pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn run_simple(audio: &DecodedAudio, config: &ExtractionConfig) -> EngineResult<WaveformData> {
        let pool = test_pool();
        let cancel = AtomicBool::new(false);
        run(
            audio,
            config,
            &pool,
            &PipelineTuning::default(),
            &cancel,
            &|_| {},
        )
    }

    fn ramp_audio(frames: usize) -> DecodedAudio {
        DecodedAudio {
            sample_rate: 44100,
            planes: vec![(0..frames).map(|i| i as f32 / frames as f32).collect()],
        }
    }

    #[test]
    fn test_output_point_count_is_ceiling() {
        let audio = ramp_audio(1050);
        let mut config = ExtractionConfig::new("unused", 100);
        config.normalize = false;

        let data = run_simple(&audio, &config).unwrap();
        assert_eq!(data.points_per_channel(), 11); // ceil(1050 / 100)
    }

    #[test]
    fn test_oversized_window_yields_single_point() {
        let audio = ramp_audio(500);
        let config = ExtractionConfig::new("unused", 1000);

        let data = run_simple(&audio, &config).unwrap();
        assert_eq!(data.points_per_channel(), 1);
    }

    #[test]
    fn test_reducer_keeps_larger_magnitude_with_sign() {
        let audio = DecodedAudio {
            sample_rate: 44100,
            planes: vec![vec![0.1, -0.8, 0.3, 0.2, 0.9, -0.1]],
        };
        let mut config = ExtractionConfig::new("unused", 3);
        config.normalize = false;

        let data = run_simple(&audio, &config).unwrap();
        assert_eq!(data.channels[0], vec![-0.8, 0.9]);
    }

    #[test]
    fn test_normalization_maps_peak_to_scale() {
        let audio = DecodedAudio {
            sample_rate: 44100,
            planes: vec![vec![0.25, -0.5], vec![0.1, 0.05]],
        };
        let mut config = ExtractionConfig::new("unused", 1);
        config.normalize = true;
        config.scale = 1.0;

        let data = run_simple(&audio, &config).unwrap();
        // Global peak 0.5 maps to 1.0; everything scales by 2
        assert!((data.channels[0][0] - 0.5).abs() < 1e-6);
        assert!((data.channels[0][1] + 1.0).abs() < 1e-6);
        assert!((data.channels[1][0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_zeroes_small_magnitudes() {
        let audio = DecodedAudio {
            sample_rate: 44100,
            planes: vec![vec![1.0, 0.05, -0.04, 0.5]],
        };
        let mut config = ExtractionConfig::new("unused", 1);
        config.threshold = 0.2;

        let data = run_simple(&audio, &config).unwrap();
        assert_eq!(data.channels[0][1], 0.0);
        assert_eq!(data.channels[0][2], 0.0);
        assert!(data.channels[0][3] > 0.0);
    }

    #[test]
    fn test_silent_input_stays_zero_under_normalization() {
        let audio = DecodedAudio {
            sample_rate: 44100,
            planes: vec![vec![0.0; 256]],
        };
        let config = ExtractionConfig::new("unused", 16);

        let data = run_simple(&audio, &config).unwrap();
        assert!(data.channels[0].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_cancel_aborts_with_cancelled() {
        let audio = ramp_audio(100_000);
        let config = ExtractionConfig::new("unused", 1);
        let pool = test_pool();
        let cancel = AtomicBool::new(true);

        let err = run(
            &audio,
            &config,
            &pool,
            &PipelineTuning::default(),
            &cancel,
            &|_| {},
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn test_progress_is_monotone_and_ends_at_one() {
        let audio = ramp_audio(200_000);
        let mut config = ExtractionConfig::new("unused", 10);
        config.normalize = false;
        let pool = test_pool();
        let cancel = AtomicBool::new(false);

        let seen = Mutex::new(Vec::new());
        run(
            &audio,
            &config,
            &pool,
            &PipelineTuning {
                windows_per_range: 256,
                parallel_threshold: 1024,
                progress_step: 0.05,
            },
            &cancel,
            &|fraction| seen.lock().unwrap().push(fraction),
        )
        .unwrap();

        let seen = seen.into_inner().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[test]
    fn test_parallel_and_serial_agree() {
        let audio = ramp_audio(50_000);
        let mut config = ExtractionConfig::new("unused", 7);
        config.normalize = false;
        let pool = test_pool();
        let cancel = AtomicBool::new(false);

        let serial = run(
            &audio,
            &config,
            &pool,
            &PipelineTuning {
                windows_per_range: 64,
                parallel_threshold: usize::MAX,
                progress_step: 1.0,
            },
            &cancel,
            &|_| {},
        )
        .unwrap();

        let parallel = run(
            &audio,
            &config,
            &pool,
            &PipelineTuning {
                windows_per_range: 64,
                parallel_threshold: 0,
                progress_step: 1.0,
            },
            &cancel,
            &|_| {},
        )
        .unwrap();

        assert_eq!(serial.channels, parallel.channels);
    }
}
