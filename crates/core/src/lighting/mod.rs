//! Lighting data: keyframed sequences and recorded DMX takes.

use serde::{Deserialize, Deserializer, Serialize};

/// Easing applied to the progress between two keyframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl Easing {
    /// Remaps `t` in `[0, 1]`. Endpoints are fixed for every curve.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t,
            Self::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Self::EaseInOut => 3.0 * t * t - 2.0 * t * t * t,
        }
    }
}

/// A patched fixture: `channel_count` consecutive channels starting at the
/// 1-based `start_channel` of `universe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub universe: Option<u16>,
    #[serde(default = "default_start_channel")]
    pub start_channel: u16,
    pub channel_count: u16,
}

fn default_start_channel() -> u16 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    /// Seconds from the start of the sequence.
    pub time: f64,
    pub fixture_id: String,
    pub values: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingSequence {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Length in seconds.
    pub duration: f64,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub interpolation: Easing,
    #[serde(default)]
    pub fixtures: Vec<Fixture>,
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
}

fn default_speed() -> f64 {
    1.0
}

/// How a linked recording combines with the scene's sequence output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    ProjectOnly,
    RecordingOnly,
    /// Non-zero recording channels override the sequence.
    #[default]
    RecordingPriority,
    /// Highest takes precedence.
    Blend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingLink {
    pub recording_id: String,
    #[serde(default)]
    pub mode: RecordingMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub offset_ms: i64,
    /// Restart the take from its trimmed start once it runs out.
    #[serde(default, rename = "loop")]
    pub looping: bool,
}

fn default_enabled() -> bool {
    true
}

/// One captured universe frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFrame {
    /// Milliseconds from the start of the take.
    #[serde(rename = "t")]
    pub timestamp_ms: u64,
    #[serde(rename = "d")]
    pub channels: Vec<u8>,
}

/// A take captured from a lighting console, replayed frame by frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmxRecording {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub universe: u16,
    #[serde(default)]
    pub trim_start_ms: u64,
    /// Zero keeps the take until its last frame.
    #[serde(default)]
    pub trim_end_ms: u64,
    #[serde(default, deserialize_with = "sorted_frames")]
    pub frames: Vec<RecordedFrame>,
}

fn sorted_frames<'de, D>(deserializer: D) -> Result<Vec<RecordedFrame>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut frames = Vec::<RecordedFrame>::deserialize(deserializer)?;
    frames.sort_by_key(|frame| frame.timestamp_ms);
    Ok(frames)
}

impl DmxRecording {
    /// Orders frames by timestamp; frames sharing one keep their order.
    pub fn sort_frames(&mut self) {
        self.frames.sort_by_key(|frame| frame.timestamp_ms);
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.end_ms();
        end.saturating_sub(self.trim_start_ms)
    }

    fn end_ms(&self) -> u64 {
        let last = self.frames.last().map(|f| f.timestamp_ms).unwrap_or(0);
        if self.trim_end_ms > 0 {
            self.trim_end_ms.min(last)
        } else {
            last
        }
    }

    /// Channels of the latest frame at or before `position_ms` of the
    /// trimmed take. Frames are held, not interpolated; past the trimmed end
    /// the last frame is held.
    pub fn frame_at(&self, position_ms: u64) -> Option<&[u8]> {
        let target = self
            .trim_start_ms
            .saturating_add(position_ms)
            .min(self.end_ms());
        let index = self
            .frames
            .partition_point(|frame| frame.timestamp_ms <= target);
        index
            .checked_sub(1)
            .and_then(|i| self.frames.get(i))
            .map(|frame| frame.channels.as_slice())
    }
}
