//! Waveform extraction engine
//!
//! Turns a decoded sample stream and a pixel budget into per-channel
//! downsampled amplitude arrays: contiguous windows of `samples_per_pixel`
//! source samples reduced to one point each, optionally normalized so the
//! global peak maps to `scale`. Large inputs are processed as window
//! ranges on the shared worker pool; progress is accumulated through an
//! atomic counter and reported at a bounded rate.

mod extractor;
mod pipeline;

pub use extractor::{Extractor, ExtractionTicket};
pub(crate) use pipeline::PipelineTuning;

use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Configuration for one extraction job
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Source audio file
    pub path: PathBuf,
    /// Window size: source samples reduced to one output point
    pub samples_per_pixel: usize,
    /// Rescale so the global peak maps to `scale`
    pub normalize: bool,
    /// Normalization target (ignored when `normalize` is false)
    pub scale: f32,
    /// Output magnitudes below this are zeroed after normalization
    pub threshold: f32,
}

impl ExtractionConfig {
    /// Config with the default normalization (peak to 1.0, no threshold)
    pub fn new(path: impl Into<PathBuf>, samples_per_pixel: usize) -> Self {
        Self {
            path: path.into(),
            samples_per_pixel,
            normalize: true,
            scale: 1.0,
            threshold: 0.0,
        }
    }

    /// Validate numeric inputs before any resource is touched
    pub fn validate(&self) -> EngineResult<()> {
        if self.samples_per_pixel == 0 {
            return Err(EngineError::invalid("samples_per_pixel must be >= 1"));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(EngineError::invalid("scale must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(EngineError::invalid("threshold must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Result of a completed extraction
#[derive(Debug, Clone)]
pub struct WaveformData {
    /// One amplitude array per source channel, values in [-1, 1]
    pub channels: Vec<Vec<f32>>,
    /// Window size the data was produced with
    pub samples_per_pixel: usize,
    /// Source length in frames (per channel)
    pub source_frames: usize,
    /// Source sample rate in Hz
    pub source_sample_rate: u32,
}

impl WaveformData {
    /// Output points per channel
    pub fn points_per_channel(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = ExtractionConfig::new("a.wav", 100);
        assert!(config.validate().is_ok());

        config.samples_per_pixel = 0;
        assert!(config.validate().is_err());

        config.samples_per_pixel = 100;
        config.scale = 0.0;
        assert!(config.validate().is_err());

        config.scale = 1.0;
        config.threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
