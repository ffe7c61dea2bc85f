//! Wall-clock based timers.
//!
//! Every displayed value is recomputed from a start anchor as
//! `floor((now - start) / 1000)` seconds. Nothing counts ticks, so a suspended
//! terminal or a late tick never drifts the clocks.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Source of "now". Injected so tests can move time by hand.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock; clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = instant;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Whole seconds between `start` and `now`, never negative.
pub fn elapsed_secs(start: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (now - start).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis / 1000) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopwatch {
    started_at: DateTime<Utc>,
}

impl Stopwatch {
    pub fn start(now: DateTime<Utc>) -> Self {
        Self { started_at: now }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        elapsed_secs(self.started_at, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TimerKind {
    Set,
    Rest,
}

/// Last values shown to the user, refreshed once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerDisplay {
    pub workout_secs: u64,
    pub set_secs: u64,
    pub rest_secs: u64,
}

/// The workout clock plus at most one phase-scoped clock (set or rest).
#[derive(Debug, Clone)]
pub struct PhaseTimers {
    workout: Stopwatch,
    phase: Option<(TimerKind, Stopwatch)>,
    display: TimerDisplay,
    torn_down: bool,
}

impl PhaseTimers {
    /// The workout clock runs from the session's own start time, so a
    /// resumed session keeps counting from when it really began.
    pub fn new(workout_started_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let workout = Stopwatch::start(workout_started_at);
        Self {
            workout,
            phase: None,
            display: TimerDisplay {
                workout_secs: workout.elapsed_secs(now),
                ..TimerDisplay::default()
            },
            torn_down: false,
        }
    }

    pub fn start_set(&mut self, now: DateTime<Utc>) {
        self.start(TimerKind::Set, now);
    }

    pub fn start_rest(&mut self, now: DateTime<Utc>) {
        self.start(TimerKind::Rest, now);
    }

    fn start(&mut self, kind: TimerKind, now: DateTime<Utc>) {
        if self.torn_down {
            return;
        }
        self.phase = Some((kind, Stopwatch::start(now)));
        self.display.set_secs = 0;
        self.display.rest_secs = 0;
    }

    /// Stop the set clock and return its elapsed seconds.
    pub fn stop_set(&mut self, now: DateTime<Utc>) -> Option<u64> {
        self.stop(TimerKind::Set, now)
    }

    /// Stop the rest clock and return its elapsed seconds.
    pub fn stop_rest(&mut self, now: DateTime<Utc>) -> Option<u64> {
        self.stop(TimerKind::Rest, now)
    }

    fn stop(&mut self, kind: TimerKind, now: DateTime<Utc>) -> Option<u64> {
        match self.phase {
            Some((running, watch)) if running == kind => {
                self.phase = None;
                Some(watch.elapsed_secs(now))
            }
            _ => None,
        }
    }

    pub fn running(&self) -> Option<TimerKind> {
        self.phase.map(|(kind, _)| kind)
    }

    pub fn phase_elapsed_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        self.phase.map(|(_, watch)| watch.elapsed_secs(now))
    }

    pub fn refresh(&mut self, now: DateTime<Utc>) {
        if self.torn_down {
            return;
        }
        self.display.workout_secs = self.workout.elapsed_secs(now);
        match self.phase {
            Some((TimerKind::Set, watch)) => self.display.set_secs = watch.elapsed_secs(now),
            Some((TimerKind::Rest, watch)) => self.display.rest_secs = watch.elapsed_secs(now),
            None => {}
        }
    }

    pub fn display(&self) -> TimerDisplay {
        self.display
    }

    /// Cancel every clock. Later `start_*`/`refresh` calls are no-ops.
    pub fn tear_down(&mut self) {
        self.phase = None;
        self.torn_down = true;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}
