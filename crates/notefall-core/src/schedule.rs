//! Schedule compilation and due-entry lookup.
//!
//! The compiler converts a [`TimelineSnapshot`] into the per-load
//! schedule: one entry per distinct note start time plus a terminal end
//! marker at the timeline duration. Entries hold the notes that start at
//! their time; firing them is the player's job.
//!
//! The schedule is also the registry the teardown contract is written
//! against: every entry a load registers is owned here and dropped with
//! the session, so nothing can outlive the snapshot that produced it.

use crate::notes::NoteEvent;
use crate::timeline::TimelineSnapshot;
use crate::timing::TickTime;
use crate::voice::VoiceEngine;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};

/// The notes that start at one schedule time.
#[derive(Clone, Debug, Default)]
pub struct ScheduleEntry {
    pub notes: Vec<NoteEvent>,
}

/// The compiled schedule for one load session.
#[derive(Debug)]
pub struct Schedule {
    entries: BTreeMap<TickTime, ScheduleEntry>,
    end: TickTime,
}

impl Schedule {
    /// Compile a snapshot into a schedule, pre-scheduling every note on
    /// the voice engine exactly once.
    ///
    /// Start times are grouped by their microsecond-canonical [`TickTime`]
    /// key, so notes sharing a start share one entry. The caller must have
    /// torn down any previous session first; two loads' schedules never
    /// coexist.
    pub fn compile(snapshot: &TimelineSnapshot, engine: &mut dyn VoiceEngine) -> Self {
        let mut entries: BTreeMap<TickTime, ScheduleEntry> = BTreeMap::new();
        for note in &snapshot.notes {
            engine.trigger(note.pitch, note.duration, note.start, note.velocity);
            entries
                .entry(TickTime::from_seconds(note.start))
                .or_default()
                .notes
                .push(note.clone());
        }

        let schedule = Self {
            entries,
            end: TickTime::from_seconds(snapshot.duration),
        };
        log::debug!(
            "compiled schedule: {} entries for {} notes, end at {:.3}s",
            schedule.entries.len(),
            snapshot.notes.len(),
            schedule.end.to_seconds(),
        );
        schedule
    }

    /// The terminal end marker time.
    pub fn end(&self) -> TickTime {
        self.end
    }

    /// Number of grouped entries (the terminal marker not included).
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Collect entries strictly after `after` and at or before `upto`, in
    /// time order.
    ///
    /// The cursor semantics make re-firing impossible: a caller that
    /// advances `after` to each returned batch's time sees every entry at
    /// most once per pass over it, and a forward seek that moves the
    /// cursor past entries skips them for good.
    pub fn collect_due(&self, after: TickTime, upto: TickTime) -> Vec<(TickTime, Vec<NoteEvent>)> {
        if upto < after {
            return Vec::new();
        }
        self.entries
            .range((Excluded(after), Included(upto)))
            .map(|(time, entry)| (*time, entry.notes.clone()))
            .collect()
    }

    /// Drop every entry. Called from session teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::Pitch;

    #[derive(Default)]
    struct RecordingEngine {
        triggers: Vec<(Pitch, f64, f64, f32)>,
    }

    impl VoiceEngine for RecordingEngine {
        fn trigger(&mut self, pitch: Pitch, duration: f64, at: f64, velocity: f32) {
            self.triggers.push((pitch, duration, at, velocity));
        }

        fn release_all(&mut self) {}

        fn set_volume_db(&mut self, _db: f32) {}

        fn dispose(&mut self) {}
    }

    fn note(midi: u8, start: f64, duration: f64) -> NoteEvent {
        NoteEvent {
            pitch: Pitch::from_midi(midi),
            start,
            duration,
            velocity: 0.8,
        }
    }

    fn snapshot(duration: f64, notes: Vec<NoteEvent>) -> TimelineSnapshot {
        TimelineSnapshot { duration, notes }
    }

    #[test]
    fn test_one_entry_per_distinct_start() {
        let snap = snapshot(
            4.0,
            vec![
                note(60, 0.0, 1.0),
                note(64, 0.0, 1.0),
                note(67, 1.5, 0.5),
                note(72, 3.0, 1.0),
            ],
        );
        let schedule = Schedule::compile(&snap, &mut RecordingEngine::default());

        assert_eq!(schedule.entry_count(), 3);
        assert_eq!(schedule.end(), TickTime::from_seconds(4.0));
    }

    #[test]
    fn test_shared_start_batches_together() {
        let snap = snapshot(2.0, vec![note(60, 0.5, 1.0), note(64, 0.5, 0.25)]);
        let schedule = Schedule::compile(&snap, &mut RecordingEngine::default());

        let due = schedule.collect_due(TickTime::ZERO.previous(), TickTime::from_seconds(2.0));
        assert_eq!(due.len(), 1);
        let (time, batch) = &due[0];
        assert_eq!(*time, TickTime::from_seconds(0.5));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_every_note_triggered_exactly_once() {
        let snap = snapshot(
            2.0,
            vec![note(60, 0.0, 1.0), note(60, 0.0, 0.5), note(64, 1.0, 1.0)],
        );
        let mut engine = RecordingEngine::default();
        Schedule::compile(&snap, &mut engine);

        assert_eq!(engine.triggers.len(), 3);
        assert_eq!(engine.triggers[0], (Pitch::from_midi(60), 1.0, 0.0, 0.8));
        assert_eq!(engine.triggers[2], (Pitch::from_midi(64), 1.0, 1.0, 0.8));
    }

    #[test]
    fn test_collect_due_window_bounds() {
        let snap = snapshot(
            3.0,
            vec![note(60, 0.0, 0.5), note(62, 1.0, 0.5), note(64, 2.0, 0.5)],
        );
        let schedule = Schedule::compile(&snap, &mut RecordingEngine::default());

        // Strictly after 0.0, at or before 1.0: only the entry at 1.0.
        let due = schedule.collect_due(TickTime::from_seconds(0.0), TickTime::from_seconds(1.0));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, TickTime::from_seconds(1.0));

        // Inverted window is empty rather than a panic.
        assert!(schedule
            .collect_due(TickTime::from_seconds(2.0), TickTime::from_seconds(1.0))
            .is_empty());

        // A cursor just below an entry still picks it up.
        let due = schedule.collect_due(
            TickTime::from_seconds(2.0).previous(),
            TickTime::from_seconds(2.0),
        );
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn test_empty_snapshot_compiles_to_terminal_only() {
        let schedule = Schedule::compile(&snapshot(0.0, Vec::new()), &mut RecordingEngine::default());
        assert_eq!(schedule.entry_count(), 0);
        assert_eq!(schedule.end(), TickTime::ZERO);
    }

    #[test]
    fn test_clear_empties_registry() {
        let snap = snapshot(1.0, vec![note(60, 0.0, 1.0)]);
        let mut schedule = Schedule::compile(&snap, &mut RecordingEngine::default());
        schedule.clear();
        assert_eq!(schedule.entry_count(), 0);
        assert!(schedule
            .collect_due(TickTime::ZERO.previous(), TickTime::from_seconds(1.0))
            .is_empty());
    }
}
