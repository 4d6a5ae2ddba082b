//! Sample rate conversion on prepare
//!
//! Playback sessions hold audio at the output device rate so the render
//! path never converts. Conversion happens once, here, with rubato's
//! polynomial resampler processing the whole clip as a single chunk.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{EngineError, EngineResult};
use crate::types::Sample;

/// Resample planar audio from `input_rate` to `output_rate`
///
/// Returns the input untouched when the rates already match.
pub fn resample_planes(
    planes: Vec<Vec<Sample>>,
    input_rate: u32,
    output_rate: u32,
) -> EngineResult<Vec<Vec<Sample>>> {
    if input_rate == output_rate || planes.is_empty() {
        return Ok(planes);
    }

    let input_frames = planes[0].len();
    if input_frames == 0 {
        return Ok(planes);
    }

    log::debug!(
        "resampling {} frames x {} channels from {}Hz to {}Hz",
        input_frames,
        planes.len(),
        input_rate,
        output_rate
    );

    let mut resampler = FastFixedIn::<Sample>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        input_frames,
        planes.len(),
    )
    .map_err(|e| EngineError::SessionSetupFailed(format!("resampler init failed: {}", e)))?;

    resampler
        .process(&planes, None)
        .map_err(|e| EngineError::SessionSetupFailed(format!("resampling failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, frames: usize) -> Vec<Sample> {
        (0..frames)
            .map(|i| {
                let t = i as f32 / rate as f32;
                (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5
            })
            .collect()
    }

    #[test]
    fn test_same_rate_is_identity() {
        let planes = vec![sine(44100, 1000)];
        let out = resample_planes(planes.clone(), 44100, 44100).unwrap();
        assert_eq!(out, planes);
    }

    #[test]
    fn test_rate_conversion_scales_length() {
        let planes = vec![sine(48000, 4800), sine(48000, 4800)];
        let out = resample_planes(planes, 48000, 44100).unwrap();

        assert_eq!(out.len(), 2);
        let expected = (4800.0 * 44100.0 / 48000.0) as usize;
        let got = out[0].len();
        assert!(
            got >= expected - 20 && got <= expected + 20,
            "expected ~{} frames, got {}",
            expected,
            got
        );
    }
}
