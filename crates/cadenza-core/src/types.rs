//! Common types for Cadenza
//!
//! Fundamental audio types shared by the waveform, playback, and recording
//! engines: the sample alias, decoded PCM in planar layout, and the
//! instance/session vocabulary used by the registry and the engine facade.

/// Audio sample type (32-bit float throughout the engine)
pub type Sample = f32;

/// Fallback output rate when a backend cannot report one
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// The three instance kinds managed by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    Extractor,
    Player,
    Recorder,
}

impl InstanceKind {
    /// Get the name of this kind
    pub fn name(&self) -> &'static str {
        match self {
            InstanceKind::Extractor => "extractor",
            InstanceKind::Player => "player",
            InstanceKind::Recorder => "recorder",
        }
    }
}

impl std::fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Events delivered by the platform audio session manager
///
/// The engine does not define session policy; it only maps these onto
/// pause transitions for live players and recorders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Another process took the audio session (phone call, alarm)
    Interruption,
    /// The output/input route changed (headphones unplugged)
    RouteChange,
    /// Audio focus was lost to another client
    FocusLoss,
}

/// Decoded PCM audio in planar layout (one sample plane per channel)
///
/// All planes have the same length. Produced by the [`crate::decode::Decoder`]
/// collaborator and consumed by the waveform and playback engines.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Source sample rate in Hz
    pub sample_rate: u32,
    /// One plane of samples per channel
    pub planes: Vec<Vec<Sample>>,
}

impl DecodedAudio {
    /// Build planar audio from an interleaved stream [c0, c1, c0, c1, ...]
    pub fn from_interleaved(samples: &[Sample], channels: usize, sample_rate: u32) -> Self {
        assert!(channels > 0, "channel count must be non-zero");
        let frames = samples.len() / channels;
        let mut planes = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (plane, &sample) in planes.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }
        Self { sample_rate, planes }
    }

    /// Number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Number of sample frames (per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.planes.first().map(Vec::len).unwrap_or(0)
    }

    /// Check if there is no audio data
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration in milliseconds at the stream's sample rate
    pub fn duration_ms(&self) -> u64 {
        frames_to_ms(self.frames() as u64, self.sample_rate)
    }
}

/// Convert a frame count to milliseconds at the given rate
#[inline]
pub fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * 1000 / sample_rate as u64
}

/// Convert milliseconds to a frame count at the given rate
#[inline]
pub fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    ms * sample_rate as u64 / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved() {
        let interleaved = [1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        let audio = DecodedAudio::from_interleaved(&interleaved, 2, 44100);

        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.frames(), 3);
        assert_eq!(audio.planes[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(audio.planes[1], vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_from_interleaved_mono() {
        let audio = DecodedAudio::from_interleaved(&[0.5, 0.25], 1, 48000);
        assert_eq!(audio.channels(), 1);
        assert_eq!(audio.frames(), 2);
    }

    #[test]
    fn test_frame_time_conversions() {
        assert_eq!(frames_to_ms(44100, 44100), 1000);
        assert_eq!(ms_to_frames(1000, 44100), 44100);
        assert_eq!(frames_to_ms(22050, 44100), 500);
        assert_eq!(frames_to_ms(100, 0), 0);
    }

    #[test]
    fn test_duration_ms() {
        let audio = DecodedAudio {
            sample_rate: 44100,
            planes: vec![vec![0.0; 88200]],
        };
        assert_eq!(audio.duration_ms(), 2000);
    }
}
