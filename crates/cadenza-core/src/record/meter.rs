//! Signal level metering
//!
//! The capture callback folds each block into two atomics (peak and mean
//! square); the metering loop and `get_decibel` convert the latest block
//! to a decibel value without touching the capture path.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::Sample;

/// Decibel floor reported for silence and while paused
pub const SILENCE_FLOOR_DB: f64 = -160.0;

/// Level normalization fixed at recording start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationMode {
    /// 20·log10 of the block peak
    #[default]
    Peak,
    /// Raw average-power passthrough: 10·log10 of the block mean square
    LegacyAverage,
}

/// Latest-block level state shared between capture and metering
pub struct MeterState {
    peak_bits: AtomicU32,
    mean_square_bits: AtomicU32,
}

impl MeterState {
    pub fn new() -> Self {
        Self {
            peak_bits: AtomicU32::new(0f32.to_bits()),
            mean_square_bits: AtomicU32::new(0f32.to_bits()),
        }
    }

    /// Fold one captured block into the meter
    pub fn update(&self, block: &[Sample]) {
        if block.is_empty() {
            return;
        }
        let mut peak = 0.0f32;
        let mut power = 0.0f64;
        for &sample in block {
            peak = peak.max(sample.abs());
            power += (sample as f64) * (sample as f64);
        }
        let mean_square = (power / block.len() as f64) as f32;

        self.peak_bits.store(peak.to_bits(), Ordering::Relaxed);
        self.mean_square_bits
            .store(mean_square.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak_bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn mean_square(&self) -> f32 {
        f32::from_bits(self.mean_square_bits.load(Ordering::Relaxed))
    }

    /// Convert the latest block to decibels under the given mode
    pub fn decibel(&self, mode: NormalizationMode) -> f64 {
        let linear = match mode {
            NormalizationMode::Peak => {
                let peak = self.peak() as f64;
                if peak <= 0.0 {
                    return SILENCE_FLOOR_DB;
                }
                20.0 * peak.log10()
            }
            NormalizationMode::LegacyAverage => {
                let mean_square = self.mean_square() as f64;
                if mean_square <= 0.0 {
                    return SILENCE_FLOOR_DB;
                }
                10.0 * mean_square.log10()
            }
        };
        linear.clamp(SILENCE_FLOOR_DB, 0.0)
    }
}

impl Default for MeterState {
    fn default() -> Self {
        Self::new()
    }
}
