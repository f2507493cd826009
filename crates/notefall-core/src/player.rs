//! The playback scheduling core.
//!
//! [`Player`] owns the transport clock, the compiled schedule, the voice
//! engine, and all derived presentation state (active keys, falling notes,
//! elapsed time, done flag). The host drives it from a single thread:
//!
//! - [`Player::request_load`] starts decoding a file on a loader thread
//! - [`Player::tick`] runs on the host's draw cadence; it applies finished
//!   loads, fires due schedule entries, and expires falling-note timers
//! - the control operations ([`Player::toggle_play`], [`Player::jump`],
//!   [`Player::update_time`], [`Player::update_volume`]) mutate the clock
//!   and engine and keep the derived state consistent
//!
//! Everything owned by one load lives in a `LoadSession` value; replacing
//! or tearing down the session drops the schedule and timers wholesale, so
//! no callback of a superseded file can ever fire. A session id guards
//! against a slow load of a superseded file clobbering current state.

use crate::notes::{keyboard, KeyState, NoteEvent, Pitch};
use crate::schedule::Schedule;
use crate::timeline::{DecodedTimeline, TimelineSnapshot, TimelineSource};
use crate::timing::{TickTime, TransportClock};
use crate::voice::VoiceEngine;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wall-clock lifetime of a falling note once its start has been reached.
///
/// Falling is a fixed-speed visual effect, so the lifetime is measured in
/// real time and does not follow the transport.
pub const FALL_NOTE_LIFETIME: Duration = Duration::from_secs(2);

/// Delay before playback resumes after a slider seek, letting the seek
/// settle before the transport runs again.
const RESUME_DELAY: Duration = Duration::from_millis(100);

/// Delay before the second voice release after pausing, catching voices
/// whose triggers were in flight when the first release ran.
const RELEASE_GRACE: Duration = Duration::from_millis(150);

type SessionId = u64;

struct LoadResult {
    session: SessionId,
    outcome: anyhow::Result<DecodedTimeline>,
}

/// Everything owned by one successful load.
///
/// Dropping the session drops the snapshot, the schedule registry, and the
/// engine together; nothing derived from a superseded file survives it.
struct LoadSession {
    snapshot: TimelineSnapshot,
    schedule: Schedule,
    engine: Box<dyn VoiceEngine>,
    /// Entries at or before this time have fired. Reset to just below the
    /// target on every seek so an entry exactly at the target still fires.
    fired_upto: TickTime,
    /// Whether the terminal end marker has fired since the last seek.
    end_fired: bool,
}

struct FallTimer {
    deadline: Instant,
    notes: Vec<NoteEvent>,
}

/// The playback scheduling core for one animated MIDI player.
pub struct Player {
    source: Arc<dyn TimelineSource>,
    clock: TransportClock,

    session: Option<LoadSession>,
    session_counter: SessionId,
    current_session: SessionId,
    pending_engine: Option<Box<dyn VoiceEngine>>,
    load_tx: Sender<LoadResult>,
    load_rx: Receiver<LoadResult>,
    load_error: Option<String>,

    input_text: String,
    volume_db: f32,
    is_playing: bool,
    is_done: bool,
    elapsed: f64,
    duration: f64,
    keys: Vec<KeyState>,
    fall_notes: Vec<NoteEvent>,
    fall_timers: Vec<FallTimer>,
    pending_resume: Option<Instant>,
    pending_release: Option<Instant>,
}

impl Player {
    /// Create a player with no file loaded. All control operations no-op
    /// until a load completes.
    pub fn new(source: Arc<dyn TimelineSource>, now: Instant) -> Self {
        let (load_tx, load_rx) = unbounded();
        Self {
            source,
            clock: TransportClock::new(now),
            session: None,
            session_counter: 0,
            current_session: 0,
            pending_engine: None,
            load_tx,
            load_rx,
            load_error: None,
            input_text: String::new(),
            volume_db: 0.0,
            is_playing: false,
            is_done: false,
            elapsed: 0.0,
            duration: 0.0,
            keys: keyboard(),
            fall_notes: Vec::new(),
            fall_timers: Vec::new(),
            pending_resume: None,
            pending_release: None,
        }
    }

    // === Loading & lifecycle ===

    /// Begin loading `locator`, superseding any current or pending load.
    ///
    /// The current session is torn down immediately; `engine` becomes the
    /// voice engine of the new session once the decode finishes. The decode
    /// runs on a loader thread and is applied by a later [`tick`].
    ///
    /// [`tick`]: Player::tick
    pub fn request_load(&mut self, locator: &str, engine: Box<dyn VoiceEngine>, now: Instant) {
        self.teardown_session(now);
        self.session_counter += 1;
        self.current_session = self.session_counter;
        self.pending_engine = Some(engine);

        let source = Arc::clone(&self.source);
        let tx = self.load_tx.clone();
        let locator = locator.to_string();
        let session = self.current_session;
        log::debug!("loading {locator} (session {session})");

        let spawned = std::thread::Builder::new()
            .name("notefall-loader".into())
            .spawn(move || {
                let outcome = source.load(&locator);
                if tx.send(LoadResult { session, outcome }).is_err() {
                    log::trace!("player dropped before load result delivery");
                }
            });
        if let Err(err) = spawned {
            log::warn!("failed to spawn loader thread: {err}");
            self.load_error = Some(format!("failed to spawn loader thread: {err}"));
            if let Some(mut engine) = self.pending_engine.take() {
                engine.dispose();
            }
        }
    }

    /// Tear down the player: stop the transport, release and dispose the
    /// engine, drop the schedule and all pending timers.
    ///
    /// Idempotent, and safe while a load is still in flight; the stale
    /// result is discarded when it arrives.
    pub fn teardown(&mut self, now: Instant) {
        self.session_counter += 1;
        self.current_session = self.session_counter;
        self.teardown_session(now);
    }

    fn teardown_session(&mut self, now: Instant) {
        self.pending_resume = None;
        self.pending_release = None;
        if let Some(mut session) = self.session.take() {
            self.clock.pause(now);
            session.engine.release_all();
            session.engine.dispose();
            session.schedule.clear();
            log::debug!("tore down load session");
        }
        if let Some(mut engine) = self.pending_engine.take() {
            engine.dispose();
        }
        self.clock.seek(0.0, now);
        self.fall_timers.clear();
        self.fall_notes.clear();
        for key in &mut self.keys {
            key.is_active = false;
        }
        self.is_playing = false;
        self.is_done = false;
        self.elapsed = 0.0;
        self.duration = 0.0;
        self.load_error = None;
    }

    fn apply_load(&mut self, result: LoadResult, now: Instant) {
        if result.session != self.current_session {
            log::debug!("dropping stale load result (session {})", result.session);
            return;
        }
        let decoded = match result.outcome {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!("timeline load failed: {err:#}");
                self.load_error = Some(format!("{err:#}"));
                if let Some(mut engine) = self.pending_engine.take() {
                    engine.dispose();
                }
                return;
            }
        };
        let Some(mut engine) = self.pending_engine.take() else {
            return;
        };

        let snapshot = TimelineSnapshot::from_decoded(decoded);
        self.clock.pause(now);
        self.clock.seek(0.0, now);
        let schedule = Schedule::compile(&snapshot, engine.as_mut());
        engine.set_volume_db(self.volume_db);

        self.duration = snapshot.duration;
        self.session = Some(LoadSession {
            snapshot,
            schedule,
            engine,
            fired_upto: TickTime::ZERO.previous(),
            end_fired: false,
        });
        self.is_playing = false;
        self.is_done = false;
        self.elapsed = 0.0;
        self.load_error = None;
    }

    // === Clock-driven updates ===

    /// Advance the player to `now`. Call on the host's draw cadence.
    pub fn tick(&mut self, now: Instant) {
        while let Ok(result) = self.load_rx.try_recv() {
            self.apply_load(result, now);
        }

        if let Some(deadline) = self.pending_release {
            if now >= deadline {
                self.pending_release = None;
                if let Some(session) = &mut self.session {
                    session.engine.release_all();
                }
            }
        }

        if let Some(deadline) = self.pending_resume {
            if now >= deadline {
                self.pending_resume = None;
                if self.is_playing {
                    self.clock.start(now);
                }
            }
        }

        self.fire_due(now);
        self.expire_fall_timers(now);

        if self.session.is_some() {
            self.elapsed = self.clock.seconds_at(now).min(self.duration);
        }
    }

    fn fire_due(&mut self, now: Instant) {
        if !self.clock.is_running() {
            return;
        }
        let t = TickTime::from_seconds(self.clock.seconds_at(now));
        let (due, end_due) = match &mut self.session {
            Some(session) => {
                let due = session.schedule.collect_due(session.fired_upto, t);
                if t > session.fired_upto {
                    session.fired_upto = t;
                }
                let end_due = !session.end_fired && t >= session.schedule.end();
                if end_due {
                    session.end_fired = true;
                }
                (due, end_due)
            }
            None => return,
        };

        for (time, batch) in due {
            self.fire_entry(time, batch, now);
        }
        if end_due {
            self.finish(now);
        }
    }

    /// One state-update firing: recompute the keyboard for time `at` and
    /// start the visual fall of the notes beginning there.
    ///
    /// Mutates derived state only; audio was pre-scheduled at compile time.
    fn fire_entry(&mut self, at: TickTime, batch: Vec<NoteEvent>, now: Instant) {
        let Some(session) = &self.session else {
            return;
        };
        let t = at.to_seconds();

        // Every key is reassigned on every firing, so keys held by notes
        // whose interval has lapsed go inactive without a dedicated entry.
        let active: HashSet<Pitch> = session
            .snapshot
            .notes
            .iter()
            .filter(|note| note.sounding_at(t))
            .map(|note| note.pitch)
            .collect();
        for key in &mut self.keys {
            key.is_active = active.contains(&key.pitch());
        }

        log::trace!("fired entry at {t:.3}s: {} starting notes", batch.len());
        self.fall_notes.extend(batch.iter().cloned());
        self.fall_timers.push(FallTimer {
            deadline: now + FALL_NOTE_LIFETIME,
            notes: batch,
        });
    }

    fn finish(&mut self, now: Instant) {
        self.clock.pause(now);
        self.clock.seek(self.duration, now);
        self.is_playing = false;
        self.is_done = true;
        self.elapsed = self.duration;
        log::debug!("playback finished at {:.3}s", self.duration);
    }

    /// Remove each expired batch's notes by value, so a batch added by a
    /// later firing is never clipped by an earlier batch's timer.
    fn expire_fall_timers(&mut self, now: Instant) {
        let mut index = 0;
        while index < self.fall_timers.len() {
            if self.fall_timers[index].deadline <= now {
                let timer = self.fall_timers.swap_remove(index);
                for note in &timer.notes {
                    if let Some(position) = self.fall_notes.iter().position(|n| n == note) {
                        self.fall_notes.remove(position);
                    }
                }
            } else {
                index += 1;
            }
        }
    }

    // === Control operations ===

    /// Toggle between playing and paused.
    ///
    /// Pausing releases all sounding voices immediately and once more a
    /// short grace period later. Resuming from the done state rewinds to
    /// the start first.
    pub fn toggle_play(&mut self, now: Instant) {
        let Some(session) = &mut self.session else {
            return;
        };
        if self.is_playing {
            session.engine.release_all();
            self.pending_release = Some(now + RELEASE_GRACE);
            self.clock.pause(now);
            self.is_playing = false;
        } else {
            if self.is_done {
                self.clock.pause(now);
                self.clock.seek(0.0, now);
                session.engine.release_all();
                session.fired_upto = TickTime::ZERO.previous();
                session.end_fired = false;
                self.is_done = false;
                self.elapsed = 0.0;
            }
            self.pending_release = None;
            self.clock.start(now);
            self.is_playing = true;
        }
    }

    /// Jump to the time entered in the free-text input and start playing.
    ///
    /// Malformed or out-of-range input is a silent no-op. Falling notes
    /// are left to their own timers; only the slider seek clears them.
    pub fn jump(&mut self, now: Instant) {
        let Some(session) = &mut self.session else {
            return;
        };
        let Ok(target) = self.input_text.trim().parse::<f64>() else {
            return;
        };
        if !target.is_finite() || target < 0.0 || target >= self.duration {
            return;
        }

        session.engine.release_all();
        self.pending_release = None;
        self.pending_resume = None;
        self.clock.pause(now);
        self.clock.seek(target, now);
        session.fired_upto = TickTime::from_seconds(target).previous();
        session.end_fired = false;
        self.is_done = false;
        self.elapsed = target;
        self.clock.start(now);
        self.is_playing = true;
    }

    /// Slider-driven seek to `target` seconds.
    ///
    /// Clears the falling notes immediately (visual state means nothing
    /// detached from the schedule that produced it) and, if playback was
    /// running, resumes once the seek has settled. Out-of-range targets,
    /// including exactly the duration, are a silent no-op.
    pub fn update_time(&mut self, target: f64, now: Instant) {
        let Some(session) = &mut self.session else {
            return;
        };
        if !target.is_finite() || target < 0.0 || target >= self.duration {
            return;
        }

        let was_playing = self.is_playing;
        self.pending_release = None;
        self.clock.pause(now);
        session.engine.release_all();
        self.clock.seek(target, now);
        session.fired_upto = TickTime::from_seconds(target).previous();
        session.end_fired = false;
        self.is_done = false;
        self.elapsed = target;
        self.fall_notes.clear();
        self.fall_timers.clear();
        if was_playing {
            self.pending_resume = Some(now + RESUME_DELAY);
        }
    }

    /// Set the voice engine gain as a decibel offset. The value survives
    /// reloads; each new session's engine starts at the retained volume.
    pub fn update_volume(&mut self, db: f32) {
        let Some(session) = &mut self.session else {
            return;
        };
        session.engine.set_volume_db(db);
        self.volume_db = db;
    }

    /// Set the free-text jump input.
    pub fn set_input_text(&mut self, text: impl Into<String>) {
        self.input_text = text.into();
    }

    // === Derived state for the presentation layer ===

    /// The free-text jump input.
    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    /// Whether the transport is notionally playing.
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Whether playback reached the end without an intervening seek.
    pub fn is_done(&self) -> bool {
        self.is_done
    }

    /// Whether a load session is live. Control operations no-op otherwise.
    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    /// Playback position in seconds, as of the last [`tick`](Player::tick)
    /// or control operation.
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed
    }

    /// Timeline length in seconds; 0 while nothing is loaded.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// The current gain offset in decibels.
    pub fn volume(&self) -> f32 {
        self.volume_db
    }

    /// The 84-key display keyboard, ascending from C1 to B7.
    pub fn keys(&self) -> &[KeyState] {
        &self.keys
    }

    /// Notes currently falling through the visual field.
    pub fn fall_notes(&self) -> &[NoteEvent] {
        &self.fall_notes
    }

    /// The most recent load failure, if the current load attempt failed.
    pub fn last_load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.teardown(Instant::now());
    }
}
