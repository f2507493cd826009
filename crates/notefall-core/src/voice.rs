//! The polyphonic voice engine seam.
//!
//! The core never synthesizes audio itself. The host supplies one
//! [`VoiceEngine`] per load; the player owns it for the lifetime of that
//! load session and disposes it on teardown.

use crate::notes::Pitch;

/// A polyphonic instrument driven by the playback schedule.
///
/// Voice triggering is pre-scheduled: the compiler calls [`trigger`] once
/// per note per load, with the start expressed in transport seconds, and
/// the engine is expected to follow the transport from there. State-update
/// firings never re-trigger audio.
///
/// [`trigger`]: VoiceEngine::trigger
pub trait VoiceEngine {
    /// Schedule one voice: play `pitch` for `duration` seconds starting at
    /// transport time `at`, scaled by `velocity` in [0, 1].
    fn trigger(&mut self, pitch: Pitch, duration: f64, at: f64, velocity: f32);

    /// Release every currently sounding voice.
    fn release_all(&mut self);

    /// Set the engine gain as a decibel offset (0 dB = unity).
    fn set_volume_db(&mut self, db: f32);

    /// Tear the engine down. Must be idempotent; every other method must
    /// be a no-op afterwards.
    fn dispose(&mut self);
}

/// A voice engine that produces no sound.
///
/// Useful for headless hosts and tests that only exercise scheduling.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullVoiceEngine;

impl VoiceEngine for NullVoiceEngine {
    fn trigger(&mut self, _pitch: Pitch, _duration: f64, _at: f64, _velocity: f32) {}

    fn release_all(&mut self) {}

    fn set_volume_db(&mut self, _db: f32) {}

    fn dispose(&mut self) {}
}
