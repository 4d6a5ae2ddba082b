//! Playback engine
//!
//! One rendering session per player instance, an explicit state machine
//! over prepare/start/pause/stop/seek, and a timer-driven update loop that
//! delivers position callbacks and the one-shot finish callback.

mod output;
mod player;

pub use output::{
    CpalOutputFactory, NullOutputFactory, OutputBackend, OutputFactory, RenderState,
};
pub use player::Player;

use std::path::PathBuf;
use std::time::Duration;

/// Playback state machine tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerState {
    Unprepared = 0,
    Prepared = 1,
    Playing = 2,
    Paused = 3,
    Stopped = 4,
}

impl PlayerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerState::Prepared,
            2 => PlayerState::Playing,
            3 => PlayerState::Paused,
            4 => PlayerState::Stopped,
            _ => PlayerState::Unprepared,
        }
    }
}

/// Policy applied at end-of-media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishMode {
    /// Settle to `Stopped` and fire the finish callback once
    #[default]
    Stop,
    /// Wrap to position zero; the finish callback never fires
    Loop,
}

/// Selector for [`Player::duration_ms`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationKind {
    /// Elapsed position
    Current,
    /// Total media duration
    Max,
}

/// Position callback cadence tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateFrequency {
    /// ~500 ms
    Coarse,
    /// ~100 ms
    #[default]
    Medium,
    /// ~16 ms
    Fine,
}

impl UpdateFrequency {
    /// Interval between position callbacks
    pub fn interval(&self) -> Duration {
        match self {
            UpdateFrequency::Coarse => Duration::from_millis(500),
            UpdateFrequency::Medium => Duration::from_millis(100),
            UpdateFrequency::Fine => Duration::from_millis(16),
        }
    }
}

/// Configuration for [`Player::prepare`]
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Source audio file
    pub path: PathBuf,
    /// Initial volume in [0, 1]; None keeps the player's current volume
    pub volume: Option<f32>,
    /// Position callback cadence for this session
    pub update_frequency: UpdateFrequency,
}

impl PlayerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            volume: None,
            update_frequency: UpdateFrequency::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decoder;
    use crate::error::{EngineError, EngineResult};
    use crate::types::DecodedAudio;
    use std::path::Path;
    use std::sync::Arc;

    /// Decoder double: one second of a quiet ramp at 44.1kHz, stereo
    struct StubDecoder;

    impl Decoder for StubDecoder {
        fn decode(&self, _path: &Path) -> EngineResult<DecodedAudio> {
            let plane: Vec<f32> = (0..44100).map(|i| (i % 100) as f32 / 1000.0).collect();
            Ok(DecodedAudio {
                sample_rate: 44100,
                planes: vec![plane.clone(), plane],
            })
        }
    }

    fn test_player() -> Player {
        Player::new(
            "test".to_string(),
            Arc::new(StubDecoder),
            Arc::new(NullOutputFactory::new()),
        )
    }

    fn prepared_player() -> Player {
        let player = test_player();
        player.prepare(PlayerConfig::new("stub.wav")).unwrap();
        player
    }

    #[test]
    fn test_controls_before_prepare_fail_not_prepared() {
        let player = test_player();
        assert!(matches!(player.seek_to(0), Err(EngineError::NotPrepared)));
        assert!(matches!(
            player.set_volume(0.5),
            Err(EngineError::NotPrepared)
        ));
        assert!(matches!(
            player.set_playback_speed(1.5),
            Err(EngineError::NotPrepared)
        ));
        assert!(matches!(player.stop(), Err(EngineError::NotPrepared)));
        assert!(matches!(
            player.start(FinishMode::Stop, None),
            Err(EngineError::NotPrepared)
        ));
        assert!(matches!(player.pause(), Err(EngineError::NotPlaying)));
    }

    #[test]
    fn test_prepare_transitions_to_prepared() {
        let player = prepared_player();
        assert_eq!(player.state(), PlayerState::Prepared);
        assert_eq!(player.duration_ms(DurationKind::Max).unwrap(), 1000);
        assert_eq!(player.current_position_ms().unwrap(), 0);
    }

    #[test]
    fn test_prepare_failure_leaves_unprepared() {
        struct FailingDecoder;
        impl Decoder for FailingDecoder {
            fn decode(&self, path: &Path) -> EngineResult<DecodedAudio> {
                Err(EngineError::FileNotFound(path.display().to_string()))
            }
        }

        let player = Player::new(
            "test".to_string(),
            Arc::new(FailingDecoder),
            Arc::new(NullOutputFactory::new()),
        );
        assert!(matches!(
            player.prepare(PlayerConfig::new("missing.wav")),
            Err(EngineError::FileNotFound(_))
        ));
        assert_eq!(player.state(), PlayerState::Unprepared);
    }

    #[test]
    fn test_start_pause_stop_cycle() {
        let player = prepared_player();

        player.start(FinishMode::Stop, None).unwrap();
        assert!(player.is_playing());

        player.pause().unwrap();
        assert_eq!(player.state(), PlayerState::Paused);
        assert!(matches!(player.pause(), Err(EngineError::NotPlaying)));

        player.start(FinishMode::Stop, None).unwrap();
        player.stop().unwrap();
        assert_eq!(player.state(), PlayerState::Stopped);
        assert_eq!(player.current_position_ms().unwrap(), 0);

        // Stopped is restartable within the same session
        player.start(FinishMode::Stop, None).unwrap();
        assert!(player.is_playing());
        player.stop().unwrap();
    }

    #[test]
    fn test_invalid_volume_rejected_and_unchanged() {
        let player = prepared_player();
        player.set_volume(0.4).unwrap();

        assert!(matches!(
            player.set_volume(-0.1),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            player.set_volume(1.1),
            Err(EngineError::InvalidArgument(_))
        ));

        // Still 0.4: a later valid change confirms the setter works
        player.set_volume(0.4).unwrap();
    }

    #[test]
    fn test_invalid_speed_rejected() {
        let player = prepared_player();
        assert!(matches!(
            player.set_playback_speed(0.0),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            player.start(FinishMode::Stop, Some(-1.0)),
            Err(EngineError::InvalidArgument(_))
        ));
        assert_eq!(player.state(), PlayerState::Prepared);
    }

    #[test]
    fn test_seek_bounds() {
        let player = prepared_player();

        player.seek_to(500).unwrap();
        let pos = player.current_position_ms().unwrap();
        assert!((pos as i64 - 500).abs() <= 10, "position {} ms", pos);

        assert!(matches!(
            player.seek_to(1500),
            Err(EngineError::InvalidArgument(_))
        ));
        // Position unchanged by the rejected seek
        let pos = player.current_position_ms().unwrap();
        assert!((pos as i64 - 500).abs() <= 10);
    }

    #[test]
    fn test_seek_completes_quickly() {
        let player = prepared_player();
        let started = std::time::Instant::now();
        player.seek_to(750).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_session_event_pauses_playback() {
        let player = prepared_player();
        player.start(FinishMode::Stop, None).unwrap();

        player.handle_session_event(crate::types::SessionEvent::Interruption);
        assert_eq!(player.state(), PlayerState::Paused);

        // Events while paused are ignored
        player.handle_session_event(crate::types::SessionEvent::RouteChange);
        assert_eq!(player.state(), PlayerState::Paused);
    }
}
