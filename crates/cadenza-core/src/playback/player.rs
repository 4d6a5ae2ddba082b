//! Player instance
//!
//! Explicit tagged-state machine over the platform session:
//! `Unprepared → Prepared → Playing ⇄ Paused → Stopped (→ Prepared)`.
//! Illegal transitions are rejected here with `NotPrepared`/`NotPlaying`
//! before any platform object is touched. Volume, speed, and position are
//! atomics shared with the render path, so control calls never block the
//! audio callback and `is_playing`/`current_position_ms` are plain loads.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::decode::{resample_planes, Decoder};
use crate::dispatch::{CallbackCell, FinishCell};
use crate::error::{EngineError, EngineResult};
use crate::types::SessionEvent;

use super::output::{OutputBackend, OutputFactory, RenderState};
use super::{DurationKind, FinishMode, PlayerConfig, PlayerState};

struct Session {
    backend: Box<dyn OutputBackend>,
    render: Arc<RenderState>,
    duration_ms: u64,
}

/// A live playback instance
pub struct Player {
    key: String,
    decoder: Arc<dyn Decoder>,
    output_factory: Arc<dyn OutputFactory>,
    /// Shared with the update loop so end-of-media can settle to Stopped
    state: Arc<AtomicU8>,
    /// Persist across stop/start and re-prepare
    volume_bits: AtomicU32,
    speed_bits: AtomicU32,
    update_interval: Mutex<Duration>,
    session: Mutex<Option<Session>>,
    /// Render state mirrored outside the session lock for lock-free reads
    render_slot: RwLock<Option<Arc<RenderState>>>,
    /// Bumped on every transition out of Playing so stale update loops exit
    loop_generation: Arc<AtomicU64>,
    on_position: Arc<CallbackCell<u64>>,
    on_finished: Arc<FinishCell>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Player {
    pub(crate) fn new(
        key: String,
        decoder: Arc<dyn Decoder>,
        output_factory: Arc<dyn OutputFactory>,
    ) -> Self {
        Self {
            key,
            decoder,
            output_factory,
            state: Arc::new(AtomicU8::new(PlayerState::Unprepared as u8)),
            volume_bits: AtomicU32::new(1f32.to_bits()),
            speed_bits: AtomicU32::new(1f32.to_bits()),
            update_interval: Mutex::new(super::UpdateFrequency::Medium.interval()),
            session: Mutex::new(None),
            render_slot: RwLock::new(None),
            loop_generation: Arc::new(AtomicU64::new(0)),
            on_position: Arc::new(CallbackCell::new("position")),
            on_finished: Arc::new(FinishCell::new("finished")),
        }
    }

    /// The registry key this instance was created under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state (lock-free)
    pub fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PlayerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Load the audio resource and open an output session
    ///
    /// Any previous session is torn down first, so a failed prepare always
    /// leaves the player `Unprepared`. Allowed from every state except
    /// `Playing`/`Paused`.
    pub fn prepare(&self, config: PlayerConfig) -> EngineResult<()> {
        if let Some(volume) = config.volume {
            if !(0.0..=1.0).contains(&volume) {
                return Err(EngineError::invalid("volume must be within [0, 1]"));
            }
        }
        match self.state() {
            PlayerState::Playing | PlayerState::Paused => {
                return Err(EngineError::invalid(
                    "prepare requires an unprepared or stopped player",
                ));
            }
            _ => {}
        }

        let mut session = self.session.lock().expect("session lock poisoned");

        // Tear down the previous session before touching the decoder
        if let Some(mut old) = session.take() {
            let _ = old.backend.stop();
        }
        *self.render_slot.write().expect("render slot poisoned") = None;
        self.set_state(PlayerState::Unprepared);

        let audio = self.decoder.decode(&config.path)?;
        let output_rate = self.output_factory.sample_rate();
        let planes = resample_planes(audio.planes, audio.sample_rate, output_rate)?;

        let render = Arc::new(RenderState::new(planes, output_rate));
        if let Some(volume) = config.volume {
            self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
        }
        render.set_volume(f32::from_bits(self.volume_bits.load(Ordering::Relaxed)));
        render.set_speed(f32::from_bits(self.speed_bits.load(Ordering::Relaxed)));

        let backend = self.output_factory.open(Arc::clone(&render))?;
        let duration_ms = render.duration_ms();

        *self.update_interval.lock().expect("interval lock poisoned") =
            config.update_frequency.interval();
        *self.render_slot.write().expect("render slot poisoned") = Some(Arc::clone(&render));
        *session = Some(Session {
            backend,
            render,
            duration_ms,
        });
        self.set_state(PlayerState::Prepared);

        log::debug!("player '{}' prepared ({} ms)", self.key, duration_ms);
        Ok(())
    }

    /// Begin or resume playback
    pub fn start(&self, finish_mode: FinishMode, speed: Option<f32>) -> EngineResult<()> {
        if let Some(speed) = speed {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(EngineError::invalid("speed must be > 0"));
            }
        }
        match self.state() {
            PlayerState::Prepared | PlayerState::Paused | PlayerState::Stopped => {}
            _ => return Err(EngineError::NotPrepared),
        }

        let mut session = self.session.lock().expect("session lock poisoned");
        let session = session.as_mut().ok_or(EngineError::NotPrepared)?;

        if let Some(speed) = speed {
            self.speed_bits.store(speed.to_bits(), Ordering::Relaxed);
            session.render.set_speed(speed);
        }
        session
            .render
            .set_looping(matches!(finish_mode, FinishMode::Loop));
        session.render.take_finished();
        self.on_finished.arm();
        session.render.set_playing(true);

        if let Err(e) = session.backend.start() {
            session.render.set_playing(false);
            return Err(e);
        }

        self.set_state(PlayerState::Playing);
        self.spawn_update_loop(Arc::clone(&session.render));
        Ok(())
    }

    /// Pause playback, keeping the session and position
    pub fn pause(&self) -> EngineResult<()> {
        if self.state() != PlayerState::Playing {
            return Err(EngineError::NotPlaying);
        }

        let mut session = self.session.lock().expect("session lock poisoned");
        let session = session.as_mut().ok_or(EngineError::NotPlaying)?;

        self.loop_generation.fetch_add(1, Ordering::AcqRel);
        session.render.set_playing(false);
        session.backend.pause()?;
        self.set_state(PlayerState::Paused);
        Ok(())
    }

    /// Stop playback and reset the position to zero
    pub fn stop(&self) -> EngineResult<()> {
        if self.state() == PlayerState::Unprepared {
            return Err(EngineError::NotPrepared);
        }

        let mut session = self.session.lock().expect("session lock poisoned");
        let session = session.as_mut().ok_or(EngineError::NotPrepared)?;

        self.loop_generation.fetch_add(1, Ordering::AcqRel);
        session.render.set_playing(false);
        session.render.set_position_ms(0);
        session.backend.pause()?;
        self.set_state(PlayerState::Stopped);
        Ok(())
    }

    /// Seek to an absolute position in milliseconds
    ///
    /// Operates on the in-memory session; no file I/O is involved, so the
    /// position store is effectively instantaneous.
    pub fn seek_to(&self, position_ms: u64) -> EngineResult<()> {
        match self.state() {
            PlayerState::Prepared | PlayerState::Playing | PlayerState::Paused => {}
            _ => return Err(EngineError::NotPrepared),
        }

        let session = self.session.lock().expect("session lock poisoned");
        let session = session.as_ref().ok_or(EngineError::NotPrepared)?;

        if position_ms > session.duration_ms {
            return Err(EngineError::invalid(format!(
                "seek position {} ms beyond duration {} ms",
                position_ms, session.duration_ms
            )));
        }

        session.render.set_position_ms(position_ms);
        Ok(())
    }

    /// Set the playback volume (applies immediately, persists)
    pub fn set_volume(&self, volume: f32) -> EngineResult<()> {
        if !(volume.is_finite() && (0.0..=1.0).contains(&volume)) {
            return Err(EngineError::invalid("volume must be within [0, 1]"));
        }
        if self.state() == PlayerState::Unprepared {
            return Err(EngineError::NotPrepared);
        }

        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
        if let Some(render) = self.render() {
            render.set_volume(volume);
        }
        Ok(())
    }

    /// Set the playback speed (applies immediately, persists)
    pub fn set_playback_speed(&self, speed: f32) -> EngineResult<()> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(EngineError::invalid("speed must be > 0"));
        }
        if self.state() == PlayerState::Unprepared {
            return Err(EngineError::NotPrepared);
        }

        self.speed_bits.store(speed.to_bits(), Ordering::Relaxed);
        if let Some(render) = self.render() {
            render.set_speed(speed);
        }
        Ok(())
    }

    /// Current volume (lock-free)
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Current playback speed (lock-free)
    pub fn playback_speed(&self) -> f32 {
        f32::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    /// Total or elapsed duration in milliseconds
    pub fn duration_ms(&self, kind: DurationKind) -> EngineResult<u64> {
        let session = self.session.lock().expect("session lock poisoned");
        let session = session.as_ref().ok_or(EngineError::NotPrepared)?;
        Ok(match kind {
            DurationKind::Max => session.duration_ms,
            DurationKind::Current => session.render.position_ms(),
        })
    }

    /// Current position in milliseconds (non-blocking read)
    pub fn current_position_ms(&self) -> EngineResult<u64> {
        self.render()
            .map(|render| render.position_ms())
            .ok_or(EngineError::NotPrepared)
    }

    /// Whether the player is in the `Playing` state (lock-free)
    pub fn is_playing(&self) -> bool {
        self.state() == PlayerState::Playing
    }

    /// Register the position callback (delivered at the prepared tier)
    pub fn on_position_update(&self, callback: impl Fn(u64) + Send + 'static) {
        self.on_position.set(callback);
    }

    /// Remove the position callback
    pub fn clear_on_position_update(&self) {
        self.on_position.clear();
    }

    /// Register the one-shot finish callback
    pub fn on_finished(&self, callback: impl Fn() + Send + 'static) {
        self.on_finished.set(callback);
    }

    /// Remove the finish callback
    pub fn clear_on_finished(&self) {
        self.on_finished.clear();
    }

    /// Map a platform session event onto a pause transition
    pub fn handle_session_event(&self, event: SessionEvent) {
        if self.state() == PlayerState::Playing {
            log::info!("player '{}' pausing on {:?}", self.key, event);
            let _ = self.pause();
        }
    }

    fn render(&self) -> Option<Arc<RenderState>> {
        self.render_slot
            .read()
            .expect("render slot poisoned")
            .clone()
    }

    /// Spawn the position-update loop for the current playing run
    ///
    /// The loop is active only while `Playing` and only for the generation
    /// it was spawned with; pause/stop/shutdown bump the generation and the
    /// loop exits on its next tick without emitting.
    fn spawn_update_loop(&self, render: Arc<RenderState>) {
        let generation = self.loop_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let loop_generation = Arc::clone(&self.loop_generation);
        let on_position = Arc::clone(&self.on_position);
        let on_finished = Arc::clone(&self.on_finished);
        let state = Arc::clone(&self.state);
        let interval = *self.update_interval.lock().expect("interval lock poisoned");

        let result = std::thread::Builder::new()
            .name(format!("player-loop-{}", self.key))
            .spawn(move || loop {
                std::thread::sleep(interval);

                if loop_generation.load(Ordering::Acquire) != generation {
                    break;
                }

                if render.take_finished() {
                    // End-of-media under FinishMode::Stop: the render path
                    // already cleared the playing flag.
                    render.set_position_ms(0);
                    state.store(PlayerState::Stopped as u8, Ordering::Release);
                    on_finished.fire();
                    break;
                }

                if !render.is_playing() {
                    break;
                }

                on_position.invoke(render.position_ms());
            });

        if let Err(e) = result {
            log::error!("failed to spawn update loop for '{}': {}", self.key, e);
        }
    }

    /// Release the session and all loops; called on destroy
    pub(crate) fn shutdown(&self) {
        self.loop_generation.fetch_add(1, Ordering::AcqRel);
        let mut session = self.session.lock().expect("session lock poisoned");
        if let Some(mut old) = session.take() {
            old.render.set_playing(false);
            let _ = old.backend.stop();
        }
        *self.render_slot.write().expect("render slot poisoned") = None;
        self.set_state(PlayerState::Unprepared);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}
