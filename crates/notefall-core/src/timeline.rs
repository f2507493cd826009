//! MIDI timeline loading.
//!
//! This module turns a Standard MIDI File into the decoded timeline the
//! player schedules from:
//!
//! - [`DecodedTimeline`] - the loader output contract: duration plus tracks
//! - [`TimelineSnapshot`] - the flattened, immutable per-load note list
//! - [`TimelineSource`] - the seam the player loads through
//! - [`MidiFileSource`] - filesystem implementation backed by `midly`
//!
//! Tick-based MIDI timing is converted to absolute seconds through a tempo
//! map merged from every track, so tempo changes anywhere in the file apply
//! to all tracks.

use crate::notes::{NoteEvent, Pitch};
use anyhow::Context;
use midly::{MetaMessage, MidiMessage, Smf, Timing, Track, TrackEventKind};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Default MIDI tempo: 500,000 microseconds per quarter note (120 BPM).
const DEFAULT_US_PER_BEAT: f64 = 500_000.0;

/// Error decoding a Standard MIDI File.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed MIDI file: {0}")]
    Malformed(#[from] midly::Error),
}

/// One decoded track: just its notes, in start order.
#[derive(Clone, Debug)]
pub struct DecodedTrack {
    pub notes: Vec<NoteEvent>,
}

/// The decoded timeline contract produced by a [`TimelineSource`].
///
/// Zero tracks, zero notes, and zero duration are all legal.
#[derive(Clone, Debug)]
pub struct DecodedTimeline {
    /// Total length in seconds: the latest note end, 0 with no notes.
    pub duration: f64,
    pub tracks: Vec<DecodedTrack>,
}

/// The immutable note list one load session schedules from.
///
/// Created once per successfully loaded file and never mutated; a new file
/// supersedes the snapshot wholesale.
#[derive(Clone, Debug, Default)]
pub struct TimelineSnapshot {
    /// Total length in seconds.
    pub duration: f64,
    /// All notes from all tracks, ordered by start time.
    pub notes: Vec<NoteEvent>,
}

impl TimelineSnapshot {
    /// Flatten a decoded timeline into one ordered note list.
    pub fn from_decoded(decoded: DecodedTimeline) -> Self {
        let mut notes: Vec<NoteEvent> = decoded
            .tracks
            .into_iter()
            .flat_map(|track| track.notes)
            .collect();
        notes.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self {
            duration: decoded.duration,
            notes,
        }
    }
}

/// Asynchronous source of decoded timelines.
///
/// Implementations run on the player's loader thread, so failure modes are
/// open-ended (I/O, parse, host asset resolution).
pub trait TimelineSource: Send + Sync {
    /// Resolve `locator` and produce its decoded timeline.
    fn load(&self, locator: &str) -> anyhow::Result<DecodedTimeline>;
}

/// Loads timelines from Standard MIDI Files, treating the locator as a
/// filesystem path.
#[derive(Clone, Copy, Debug, Default)]
pub struct MidiFileSource;

impl TimelineSource for MidiFileSource {
    fn load(&self, locator: &str) -> anyhow::Result<DecodedTimeline> {
        let bytes = std::fs::read(locator)
            .with_context(|| format!("failed to read MIDI file {locator}"))?;
        Ok(decode_standard_midi(&bytes)?)
    }
}

/// Decode a Standard MIDI File into a timeline of absolute-time notes.
pub fn decode_standard_midi(bytes: &[u8]) -> Result<DecodedTimeline, DecodeError> {
    let smf = Smf::parse(bytes)?;
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int() as f64,
        // SMPTE timing falls back to the conventional 480 PPQ.
        Timing::Timecode(..) => 480.0,
    };

    let tempo = TempoMap::from_smf(&smf, ticks_per_beat);
    let tracks: Vec<DecodedTrack> = smf
        .tracks
        .iter()
        .map(|track| decode_track(track, &tempo))
        .collect();

    let duration = tracks
        .iter()
        .flat_map(|track| track.notes.iter())
        .map(NoteEvent::end)
        .fold(0.0, f64::max);

    log::debug!(
        "decoded MIDI timeline: {} tracks, {} notes, {duration:.3}s",
        tracks.len(),
        tracks.iter().map(|t| t.notes.len()).sum::<usize>(),
    );

    Ok(DecodedTimeline { duration, tracks })
}

/// Piecewise-constant tempo over absolute ticks, merged from all tracks.
struct TempoMap {
    ticks_per_beat: f64,
    segments: Vec<TempoSegment>,
}

struct TempoSegment {
    tick: u64,
    seconds: f64,
    us_per_beat: f64,
}

impl TempoMap {
    fn from_smf(smf: &Smf<'_>, ticks_per_beat: f64) -> Self {
        let mut changes: Vec<(u64, f64)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(us)) = event.kind {
                    changes.push((tick, us.as_int() as f64));
                }
            }
        }
        changes.sort_by_key(|(tick, _)| *tick);

        let mut segments = vec![TempoSegment {
            tick: 0,
            seconds: 0.0,
            us_per_beat: DEFAULT_US_PER_BEAT,
        }];
        let mut at_tick = 0u64;
        let mut at_seconds = 0.0f64;
        let mut us_per_beat = DEFAULT_US_PER_BEAT;
        for (tick, new_us_per_beat) in changes {
            at_seconds += ticks_to_seconds(tick - at_tick, us_per_beat, ticks_per_beat);
            at_tick = tick;
            us_per_beat = new_us_per_beat;
            segments.push(TempoSegment {
                tick,
                seconds: at_seconds,
                us_per_beat,
            });
        }

        Self {
            ticks_per_beat,
            segments,
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        // Later segments win on equal ticks, so a tempo set at tick 0
        // overrides the default seed segment.
        let mut base = &self.segments[0];
        for segment in &self.segments {
            if segment.tick <= tick {
                base = segment;
            } else {
                break;
            }
        }
        base.seconds + ticks_to_seconds(tick - base.tick, base.us_per_beat, self.ticks_per_beat)
    }
}

fn ticks_to_seconds(ticks: u64, us_per_beat: f64, ticks_per_beat: f64) -> f64 {
    (ticks as f64 / ticks_per_beat) * (us_per_beat / 1_000_000.0)
}

fn decode_track(track: &Track<'_>, tempo: &TempoMap) -> DecodedTrack {
    let mut notes = Vec::new();
    // Unmatched onsets per (channel, key). FIFO so overlapping notes on the
    // same key pair off in order.
    let mut pending: HashMap<(u8, u8), VecDeque<(f64, f32)>> = HashMap::new();
    let mut tick = 0u64;
    let mut last_seconds = 0.0f64;

    for event in track {
        tick += event.delta.as_int() as u64;
        let seconds = tempo.seconds_at(tick);
        last_seconds = seconds;

        if let TrackEventKind::Midi { channel, message } = event.kind {
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    pending
                        .entry((channel.as_int(), key.as_int()))
                        .or_default()
                        .push_back((seconds, vel.as_int() as f32 / 127.0));
                }
                // NoteOn with velocity zero is NoteOff by convention.
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    if let Some(queue) = pending.get_mut(&(channel.as_int(), key.as_int())) {
                        if let Some((start, velocity)) = queue.pop_front() {
                            push_note(&mut notes, key.as_int(), start, seconds, velocity);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // Onsets with no matching off end with the track.
    for ((_, key), queue) in pending {
        for (start, velocity) in queue {
            push_note(&mut notes, key, start, last_seconds, velocity);
        }
    }

    notes.sort_by(|a, b| a.start.total_cmp(&b.start));
    DecodedTrack { notes }
}

fn push_note(notes: &mut Vec<NoteEvent>, key: u8, start: f64, end: f64, velocity: f32) {
    let duration = end - start;
    if duration > 0.0 {
        notes.push(NoteEvent {
            pitch: Pitch::from_midi(key),
            start,
            duration,
            velocity,
        });
    } else {
        log::trace!(
            "dropping zero-length note {} at {start:.6}s",
            Pitch::from_midi(key)
        );
    }
}
