//! Notes and the visual keyboard.
//!
//! This module defines the pitch and note-event types shared by the
//! timeline decoder, the schedule compiler, and the player state:
//!
//! - [`Pitch`] - MIDI key number with pitch-class+octave naming
//! - [`NoteEvent`] - one decoded note with start, duration, and velocity
//! - [`KeyState`] - one key of the fixed 84-key display keyboard

use std::fmt;

const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Lowest octave shown on the display keyboard.
pub const LOW_OCTAVE: i8 = 1;
/// Highest octave shown on the display keyboard.
pub const HIGH_OCTAVE: i8 = 7;
/// Number of keys on the display keyboard (12 pitch classes, octaves 1-7).
pub const KEY_COUNT: usize = 84;

/// A pitch as a MIDI key number (C4 = 60).
///
/// Displays as pitch-class plus octave ("C#4") and parses from the same
/// form, accepting sharps and flats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pitch(u8);

impl Pitch {
    /// Create a pitch from a MIDI key number.
    pub fn from_midi(key: u8) -> Self {
        Self(key.min(127))
    }

    /// The MIDI key number.
    pub fn midi(self) -> u8 {
        self.0
    }

    /// Parse a pitch name like "C4", "F#2", or "Db5".
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let mut chars = name.chars().peekable();

        let base: i16 = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let mut accidental: i16 = 0;
        while let Some(&c) = chars.peek() {
            match c {
                '#' => {
                    accidental += 1;
                    chars.next();
                }
                'b' => {
                    accidental -= 1;
                    chars.next();
                }
                _ => break,
            }
        }

        let octave: i8 = chars.collect::<String>().parse().ok()?;

        // MIDI convention: C4 = 60, so octave -1 starts at key 0.
        let midi = (octave as i16 + 1) * 12 + base + accidental;
        if (0..=127).contains(&midi) {
            Some(Self(midi as u8))
        } else {
            None
        }
    }

    fn pitch_class(self) -> usize {
        (self.0 % 12) as usize
    }

    fn octave(self) -> i8 {
        (self.0 / 12) as i8 - 1
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PITCH_CLASSES[self.pitch_class()], self.octave())
    }
}

/// One decoded note. Immutable once produced by the timeline decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteEvent {
    /// The sounding pitch.
    pub pitch: Pitch,
    /// Start time in playback seconds.
    pub start: f64,
    /// Sounding length in seconds.
    pub duration: f64,
    /// Normalized velocity in [0, 1].
    pub velocity: f32,
}

impl NoteEvent {
    /// The instant the note stops sounding.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Whether the note sounds at time `t`.
    ///
    /// The interval is half-open: a note is inactive at the exact instant
    /// it ends.
    pub fn sounding_at(&self, t: f64) -> bool {
        self.start <= t && t < self.end()
    }
}

/// One key of the display keyboard.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyState {
    pitch: Pitch,
    /// Whether a sounding note currently holds this key down.
    pub is_active: bool,
}

impl KeyState {
    /// The key's pitch.
    pub fn pitch(&self) -> Pitch {
        self.pitch
    }

    /// The key's display name, e.g. "C#4".
    pub fn name(&self) -> String {
        self.pitch.to_string()
    }
}

/// Generate the fixed display keyboard: every chromatic pitch from C1 to
/// B7, in ascending order, all keys inactive.
///
/// The key list never changes for the lifetime of a player; only the
/// `is_active` flags are reassigned by schedule firings.
pub fn keyboard() -> Vec<KeyState> {
    let mut keys = Vec::with_capacity(KEY_COUNT);
    for octave in LOW_OCTAVE..=HIGH_OCTAVE {
        for class in 0..12u8 {
            let midi = (octave as i16 + 1) * 12 + class as i16;
            keys.push(KeyState {
                pitch: Pitch::from_midi(midi as u8),
                is_active: false,
            });
        }
    }
    keys
}
