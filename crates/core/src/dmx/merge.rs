use std::sync::Arc;

use crate::dmx::universe::{DmxFrame, DmxUniverse};
use crate::lighting::{DmxRecording, RecordingLink, RecordingMode};

/// A recorded take bound to the scene clock.
#[derive(Debug, Clone)]
pub struct RecordingPlayback {
    recording: Arc<DmxRecording>,
    mode: RecordingMode,
    offset_ms: i64,
    looping: bool,
}

impl RecordingPlayback {
    pub fn new(recording: Arc<DmxRecording>, link: &RecordingLink) -> Self {
        Self {
            recording,
            mode: link.mode,
            offset_ms: link.offset_ms,
            looping: link.looping,
        }
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    pub fn recording_id(&self) -> &str {
        &self.recording.id
    }

    /// Recorded channels at scene time `elapsed_ms`, `None` before the take
    /// starts or when it has no frames. A looping take wraps past its
    /// trimmed duration.
    pub fn frame_at(&self, elapsed_ms: u64) -> Option<&[u8]> {
        let position = i64::try_from(elapsed_ms)
            .unwrap_or(i64::MAX)
            .saturating_sub(self.offset_ms);
        let mut position = u64::try_from(position).ok()?;
        let duration = self.recording.duration_ms();
        if self.looping && duration > 0 && position > duration {
            position %= duration;
        }
        self.recording.frame_at(position)
    }

    /// Combines the take with the sequence output already in `frame`.
    pub fn merge_into(&self, elapsed_ms: u64, frame: &mut DmxFrame) {
        if self.mode == RecordingMode::ProjectOnly {
            return;
        }
        let recorded = self.frame_at(elapsed_ms);
        let universe = frame.universe_mut(self.recording.universe);
        match recorded {
            Some(recorded) => merge_universe(universe, recorded, self.mode),
            None if self.mode == RecordingMode::RecordingOnly => universe.blackout(),
            None => {}
        }
    }
}

/// Merges recorded channel data into a universe that holds the sequence
/// output.
pub fn merge_universe(universe: &mut DmxUniverse, recorded: &[u8], mode: RecordingMode) {
    match mode {
        RecordingMode::ProjectOnly => {}
        RecordingMode::RecordingOnly => *universe = DmxUniverse::from_slice(recorded),
        RecordingMode::RecordingPriority => {
            for (out, value) in universe.channels_mut().iter_mut().zip(recorded) {
                if *value != 0 {
                    *out = *value;
                }
            }
        }
        RecordingMode::Blend => {
            for (out, value) in universe.channels_mut().iter_mut().zip(recorded) {
                *out = (*out).max(*value);
            }
        }
    }
}
