//! The master playback clock. Position is an anchor reading plus the
//! position at that moment.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::{Result, ShowSyncError};

/// Monotonic time source, measured from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineSnapshot {
    pub state: PlaybackState,
    pub elapsed_ms: u64,
    pub duration_ms: Option<u64>,
    pub loop_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not playing.
    Idle,
    Running,
    /// Wrapped past the end; elapsed already carries the overshoot.
    Looped { loop_count: u32 },
    /// Reached the end without looping; the timeline is now stopped.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    Resumed,
    AlreadyPlaying,
}

pub struct TimelineMaster {
    clock: Arc<dyn Clock>,
    state: PlaybackState,
    /// Clock reading at the last anchor; `None` unless playing.
    start_instant: Option<Duration>,
    /// Position at the last anchor.
    start_position: Duration,
    elapsed: Duration,
    duration: Option<Duration>,
    looping: bool,
    loop_count: u32,
}

impl std::fmt::Debug for TimelineMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineMaster")
            .field("state", &self.state)
            .field("elapsed", &self.elapsed)
            .field("duration", &self.duration)
            .field("looping", &self.looping)
            .field("loop_count", &self.loop_count)
            .finish()
    }
}

impl TimelineMaster {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: PlaybackState::Stopped,
            start_instant: None,
            start_position: Duration::ZERO,
            elapsed: Duration::ZERO,
            duration: None,
            looping: false,
            loop_count: 0,
        }
    }

    /// Sets the scene length (`None` is infinite) and stops the timeline.
    pub fn load(&mut self, duration: Option<Duration>, looping: bool) {
        self.stop();
        self.duration = duration.filter(|d| !d.is_zero());
        self.looping = looping;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn play(&mut self) -> PlayOutcome {
        match self.state {
            PlaybackState::Playing => PlayOutcome::AlreadyPlaying,
            PlaybackState::Paused => {
                self.anchor();
                self.state = PlaybackState::Playing;
                PlayOutcome::Resumed
            }
            PlaybackState::Stopped => {
                self.anchor();
                self.state = PlaybackState::Playing;
                PlayOutcome::Started
            }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.state != PlaybackState::Playing {
            return Err(self.rejected("pause"));
        }
        self.elapsed = self.position();
        self.start_instant = None;
        self.state = PlaybackState::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state != PlaybackState::Paused {
            return Err(self.rejected("resume"));
        }
        self.anchor();
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Resets to zero. Returns `true` only when playback was actually
    /// running or paused.
    pub fn stop(&mut self) -> bool {
        let transitioned = self.state != PlaybackState::Stopped;
        self.state = PlaybackState::Stopped;
        self.start_instant = None;
        self.start_position = Duration::ZERO;
        self.elapsed = Duration::ZERO;
        self.loop_count = 0;
        transitioned
    }

    /// Moves to `position`, clamped to the duration when finite.
    pub fn seek(&mut self, position: Duration) -> Duration {
        let position = match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        };
        self.elapsed = position;
        if self.state == PlaybackState::Playing {
            self.anchor();
        } else {
            self.start_position = position;
        }
        position
    }

    pub fn seek_ms(&mut self, ms: u64) -> u64 {
        duration_ms(self.seek(Duration::from_millis(ms)))
    }

    /// Advances from the clock.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != PlaybackState::Playing {
            return TickOutcome::Idle;
        }
        self.elapsed = self.position();

        let Some(duration) = self.duration else {
            return TickOutcome::Running;
        };
        if self.elapsed < duration {
            return TickOutcome::Running;
        }

        if self.looping {
            let wraps = (self.elapsed.as_nanos() / duration.as_nanos()).max(1);
            let carried = self.elapsed.as_nanos() % duration.as_nanos();
            self.elapsed = Duration::from_nanos(u64::try_from(carried).unwrap_or(0));
            self.loop_count = self
                .loop_count
                .saturating_add(u32::try_from(wraps).unwrap_or(u32::MAX));
            self.anchor();
            TickOutcome::Looped {
                loop_count: self.loop_count,
            }
        } else {
            self.stop();
            TickOutcome::Ended
        }
    }

    pub fn elapsed(&self) -> Duration {
        let position = self.position();
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        duration_ms(self.elapsed())
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            state: self.state,
            elapsed_ms: self.elapsed_ms(),
            duration_ms: self.duration.map(duration_ms),
            loop_count: self.loop_count,
        }
    }

    fn position(&self) -> Duration {
        match self.start_instant {
            Some(start) => self.start_position + self.clock.now().saturating_sub(start),
            None => self.elapsed,
        }
    }

    fn anchor(&mut self) {
        self.start_instant = Some(self.clock.now());
        self.start_position = self.elapsed;
    }

    fn rejected(&self, action: &'static str) -> ShowSyncError {
        tracing::debug!(action, state = self.state.as_str(), "rejected transport command");
        ShowSyncError::InvalidStateTransition {
            action,
            state: self.state.as_str(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
