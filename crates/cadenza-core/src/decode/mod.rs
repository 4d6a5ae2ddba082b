//! Audio decoding boundary
//!
//! The engines consume PCM through the [`Decoder`] trait; the platform
//! decoder is a collaborator, not part of the core. [`SymphoniaDecoder`]
//! is the implementation shipped with the crate: container probe, first
//! audio track, packet/decode loop into an interleaved `SampleBuffer<f32>`,
//! then a planar split.

mod resample;

pub use resample::resample_planes;

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{EngineError, EngineResult};
use crate::types::DecodedAudio;

/// Produces decoded PCM from a file path
///
/// Implementations translate their own failures into the engine taxonomy:
/// `FileNotFound`, `UnsupportedFormat`, `CorruptedFile`.
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path) -> EngineResult<DecodedAudio>;
}

/// Symphonia-backed decoder (wav/flac/ogg by default, mp3/aac/mp4 enabled)
#[derive(Debug, Default)]
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> EngineResult<DecodedAudio> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                EngineError::FileNotFound(path.display().to_string())
            }
            _ => EngineError::CorruptedFile(format!("{}: {}", path.display(), e)),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::UnsupportedFormat("no audio track found".to_string()))?;

        let track_id = track.id;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| EngineError::UnsupportedFormat("unknown sample rate".to_string()))?;

        let channels = track
            .codec_params
            .channels
            .map(|c| c.count().max(1))
            .unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    log::warn!("error reading packet from {:?}: {}", path, e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::warn!("error decoding packet from {:?}: {}", path, e);
                    continue;
                }
            };

            if sample_buf.is_none() {
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;
                sample_buf = Some(SampleBuffer::new(duration, spec));
            }

            if let Some(ref mut buf) = sample_buf {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        if samples.is_empty() {
            return Err(EngineError::CorruptedFile(format!(
                "{}: no audio frames decoded",
                path.display()
            )));
        }

        Ok(DecodedAudio::from_interleaved(&samples, channels, sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_maps_to_file_not_found() {
        let err = SymphoniaDecoder
            .decode(Path::new("/nonexistent/audio.wav"))
            .unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound(_)));
    }

    #[test]
    fn test_garbage_file_maps_to_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not audio data at all").unwrap();

        let err = SymphoniaDecoder.decode(&path).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_decodes_generated_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..4410 {
            let t = i as f32 / 44100.0;
            let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            let val = (sample * i16::MAX as f32) as i16;
            writer.write_sample(val).unwrap();
            writer.write_sample(val).unwrap();
        }
        writer.finalize().unwrap();

        let audio = SymphoniaDecoder.decode(&path).unwrap();
        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.frames(), 4410);
        // Both channels carry the same signal
        assert!((audio.planes[0][100] - audio.planes[1][100]).abs() < 1e-6);
    }
}
