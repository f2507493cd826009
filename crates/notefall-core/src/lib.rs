//! Notefall Core - playback scheduling for an animated MIDI piano player.
//!
//! This crate provides the scheduling core behind Notefall's keyboard
//! visualization:
//!
//! - **Timing** - the transport clock and fixed-point schedule keys
//! - **Notes** - pitches, note events, the 84-key display keyboard
//! - **Timeline** - MIDI file decoding behind the [`TimelineSource`] seam
//! - **Schedule** - per-load compilation and due-entry lookup
//! - **Voice** - the polyphonic [`VoiceEngine`] seam
//! - **Player** - control operations, session lifecycle, derived state
//!
//! # Architecture
//!
//! The host asks a [`Player`] to load a file; a loader thread decodes it
//! into an immutable [`TimelineSnapshot`], which is compiled into one
//! [`Schedule`]: every note is pre-scheduled on the voice engine exactly
//! once, and note start times group into state-update entries keyed by
//! [`TickTime`]. The host then calls [`Player::tick`] on its draw cadence;
//! due entries fire in time order and rewrite the derived state (active
//! keys, falling notes, elapsed time, done flag) the presentation layer
//! renders from. Control operations move the player-owned
//! [`TransportClock`]; the schedule cursor follows every seek, so nothing
//! fires retroactively and nothing fires twice.
//!
//! All of a load's resources live in one session value with a session id.
//! Replacing the file or tearing the player down drops the session
//! wholesale and stale loader results are discarded, so no schedule entry,
//! visual timer, or voice of a superseded file ever outlives it.

pub mod notes;
pub mod player;
pub mod schedule;
pub mod timeline;
pub mod timing;
pub mod voice;

pub use notes::{keyboard, KeyState, NoteEvent, Pitch, HIGH_OCTAVE, KEY_COUNT, LOW_OCTAVE};
pub use player::{Player, FALL_NOTE_LIFETIME};
pub use schedule::{Schedule, ScheduleEntry};
pub use timeline::{
    decode_standard_midi, DecodeError, DecodedTimeline, DecodedTrack, MidiFileSource,
    TimelineSnapshot, TimelineSource,
};
pub use timing::{TickTime, TransportClock};
pub use voice::{NullVoiceEngine, VoiceEngine};
