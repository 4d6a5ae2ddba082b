//! Recording engine
//!
//! One capture session per recorder instance: permission gate, capture
//! backend, WAV writer thread, and a metering loop delivering decibel
//! callbacks at a fixed cadence.

mod capture;
mod meter;
mod recorder;

pub use capture::{
    CaptureBackend, CaptureFactory, CaptureSink, CpalCaptureFactory, SyntheticCaptureFactory,
};
pub use meter::{MeterState, NormalizationMode, SILENCE_FLOOR_DB};
pub use recorder::{Recorder, RecorderState, RecordingConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::permission::{AlwaysGranted, PermissionService, PermissionStatus};
    use std::sync::Arc;
    use std::time::Duration;

    struct DeniedPermission;

    impl PermissionService for DeniedPermission {
        fn status(&self) -> PermissionStatus {
            PermissionStatus::Denied
        }
    }

    fn test_recorder(dir: &std::path::Path, amplitude: f32) -> Recorder {
        Recorder::new(
            "test".to_string(),
            Arc::new(AlwaysGranted),
            Arc::new(SyntheticCaptureFactory::new(amplitude)),
            dir.to_path_buf(),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn test_operations_require_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = test_recorder(dir.path(), 0.5);

        assert!(matches!(
            recorder.stop_recording(),
            Err(EngineError::NoActiveRecording)
        ));
        assert!(matches!(
            recorder.pause_recording(),
            Err(EngineError::NoActiveRecording)
        ));
        assert!(matches!(
            recorder.resume_recording(),
            Err(EngineError::NoActiveRecording)
        ));
        assert!(matches!(
            recorder.decibel(),
            Err(EngineError::NoActiveRecording)
        ));
    }

    #[test]
    fn test_permission_denied_leaves_idle() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(
            "test".to_string(),
            Arc::new(DeniedPermission),
            Arc::new(SyntheticCaptureFactory::new(0.5)),
            dir.path().to_path_buf(),
            Duration::from_millis(20),
        );

        assert!(matches!(
            recorder.start_recording(RecordingConfig::new()),
            Err(EngineError::PermissionDenied(_))
        ));
        assert_eq!(recorder.state(), RecorderState::Idle);
        // No file was created
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_record_stop_produces_readable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = test_recorder(dir.path(), 0.5);

        recorder.start_recording(RecordingConfig::new()).unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);
        std::thread::sleep(Duration::from_millis(150));

        let path = recorder.stop_recording().unwrap();
        assert_eq!(recorder.state(), RecorderState::Idle);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 44100);
        assert!(reader.len() > 0);
    }

    #[test]
    fn test_start_while_recording_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = test_recorder(dir.path(), 0.5);

        recorder.start_recording(RecordingConfig::new()).unwrap();
        assert!(matches!(
            recorder.start_recording(RecordingConfig::new()),
            Err(EngineError::ResourceExhausted(_))
        ));
        recorder.stop_recording().unwrap();
    }

    #[test]
    fn test_invalid_path_rejected_before_capture() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = test_recorder(dir.path(), 0.5);

        let bogus = dir.path().join("missing-subdir").join("take.wav");
        assert!(matches!(
            recorder.start_recording(RecordingConfig::with_path(bogus)),
            Err(EngineError::InvalidPath(_))
        ));
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_pause_resume_keeps_metering_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = test_recorder(dir.path(), 0.5);

        let readings = Arc::new(std::sync::Mutex::new(Vec::new()));
        let readings_cb = Arc::clone(&readings);
        recorder.on_decibel_update(move |db| readings_cb.lock().unwrap().push(db));

        recorder.start_recording(RecordingConfig::new()).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        recorder.pause_recording().unwrap();
        assert_eq!(recorder.state(), RecorderState::Paused);
        let before = readings.lock().unwrap().len();
        std::thread::sleep(Duration::from_millis(100));
        let after = readings.lock().unwrap().len();
        // Callbacks keep arriving while paused, at the silence floor
        assert!(after > before);
        assert_eq!(*readings.lock().unwrap().last().unwrap(), SILENCE_FLOOR_DB);

        recorder.resume_recording().unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);
        recorder.stop_recording().unwrap();
    }

    #[test]
    fn test_decibel_in_valid_range() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = test_recorder(dir.path(), 0.5);

        recorder.start_recording(RecordingConfig::new()).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let db = recorder.decibel().unwrap();
        assert!((-160.0..=0.0).contains(&db), "decibel {} out of range", db);
        // A 0.5-amplitude sine peaks near -6 dB
        assert!(db > -30.0, "decibel {} unexpectedly low", db);

        recorder.stop_recording().unwrap();
    }
}
