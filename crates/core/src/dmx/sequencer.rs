use std::collections::HashMap;

use serde::Serialize;

use crate::dmx::universe::{DmxFrame, DMX_CHANNELS};
use crate::lighting::{Easing, Fixture, LightingSequence};
use crate::ShowSyncError;

/// Channel values of one fixture at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureValues {
    pub fixture_id: String,
    pub universe: Option<u16>,
    pub start_channel: u16,
    pub values: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Track {
    fixture: Fixture,
    /// Sorted by time; ties keep their authored order.
    keyframes: Vec<(f64, Vec<u8>)>,
}

impl Track {
    fn sample(&self, s: f64, easing: Easing) -> Vec<u8> {
        let index = self.keyframes.partition_point(|(time, _)| *time <= s);
        let prev = index.checked_sub(1).and_then(|i| self.keyframes.get(i));
        let next = self.keyframes.get(index);

        match (prev, next) {
            (Some((t0, from)), Some((t1, to))) => {
                let t = easing.apply((s - t0) / (t1 - t0));
                from.iter()
                    .zip(to)
                    .map(|(a, b)| {
                        let (a, b) = (f64::from(*a), f64::from(*b));
                        (a + (b - a) * t).round().clamp(0.0, 255.0) as u8
                    })
                    .collect()
            }
            (Some((_, held)), None) => held.clone(),
            // Before the first keyframe its values are already on stage.
            (None, Some((_, first))) => first.clone(),
            (None, None) => vec![0; usize::from(self.fixture.channel_count)],
        }
    }
}

/// Keyframe interpolation for one lighting sequence, prepared for the tick.
#[derive(Debug)]
pub struct DmxSequencer {
    sequence_id: String,
    duration: f64,
    looping: bool,
    speed: f64,
    easing: Easing,
    start_offset: f64,
    tracks: Vec<Track>,
    faults: Vec<ShowSyncError>,
}

impl DmxSequencer {
    /// Builds the per-fixture tracks. Keyframes that cannot be played are
    /// dropped and kept as configuration faults.
    pub fn new(sequence: &LightingSequence, start_offset_secs: f64) -> Self {
        let mut faults = Vec::new();
        let mut fault = |message: String| {
            tracing::warn!(sequence = %sequence.id, "{message}");
            faults.push(ShowSyncError::config(message));
        };

        let speed = if sequence.speed.is_finite() && sequence.speed > 0.0 {
            sequence.speed
        } else {
            fault(format!("speed {} is not positive, using 1.0", sequence.speed));
            1.0
        };
        let start_offset = if start_offset_secs.is_finite() {
            start_offset_secs.max(0.0)
        } else {
            0.0
        };

        let mut tracks: Vec<Track> = Vec::with_capacity(sequence.fixtures.len());
        let mut by_id: HashMap<&str, usize> = HashMap::new();
        for fixture in &sequence.fixtures {
            if fixture.start_channel == 0 {
                fault(format!("fixture `{}` has start channel 0", fixture.id));
                continue;
            }
            let last = usize::from(fixture.start_channel) + usize::from(fixture.channel_count) - 1;
            if last > DMX_CHANNELS {
                fault(format!(
                    "fixture `{}` ends at channel {last}, channels past {DMX_CHANNELS} are dropped",
                    fixture.id
                ));
            }
            by_id.insert(fixture.id.as_str(), tracks.len());
            tracks.push(Track {
                fixture: fixture.clone(),
                keyframes: Vec::new(),
            });
        }

        for keyframe in &sequence.keyframes {
            let Some(&index) = by_id.get(keyframe.fixture_id.as_str()) else {
                fault(format!(
                    "keyframe at {}s targets unknown fixture `{}`",
                    keyframe.time, keyframe.fixture_id
                ));
                continue;
            };
            let track = &mut tracks[index];
            if keyframe.values.len() != usize::from(track.fixture.channel_count) {
                fault(format!(
                    "keyframe at {}s for fixture `{}` has {} values, expected {}",
                    keyframe.time,
                    keyframe.fixture_id,
                    keyframe.values.len(),
                    track.fixture.channel_count
                ));
                continue;
            }
            if !keyframe.time.is_finite() || keyframe.time < 0.0 {
                fault(format!(
                    "keyframe for fixture `{}` has invalid time {}",
                    keyframe.fixture_id, keyframe.time
                ));
                continue;
            }
            track.keyframes.push((keyframe.time, keyframe.values.clone()));
        }

        for track in &mut tracks {
            // Stable: equal times keep authored order.
            track.keyframes.sort_by(|a, b| a.0.total_cmp(&b.0));
        }

        Self {
            sequence_id: sequence.id.clone(),
            duration: sequence.duration,
            looping: sequence.looping,
            speed,
            easing: sequence.interpolation,
            start_offset,
            tracks,
            faults,
        }
    }

    pub fn sequence_id(&self) -> &str {
        &self.sequence_id
    }

    pub fn faults(&self) -> &[ShowSyncError] {
        &self.faults
    }

    /// Position inside the sequence in seconds, `None` before its start
    /// offset.
    pub fn sequence_time(&self, elapsed_ms: u64) -> Option<f64> {
        let elapsed = elapsed_ms as f64 / 1000.0;
        let mut s = (elapsed - self.start_offset) * self.speed;
        if s < 0.0 {
            return None;
        }
        if self.looping && self.duration > 0.0 && s > self.duration {
            s %= self.duration;
        }
        Some(s)
    }

    pub fn sample(&self, elapsed_ms: u64) -> Vec<FixtureValues> {
        let s = self.sequence_time(elapsed_ms);
        self.tracks
            .iter()
            .map(|track| FixtureValues {
                fixture_id: track.fixture.id.clone(),
                universe: track.fixture.universe,
                start_channel: track.fixture.start_channel,
                values: match s {
                    Some(s) => track.sample(s, self.easing),
                    None => vec![0; usize::from(track.fixture.channel_count)],
                },
            })
            .collect()
    }

    /// Writes every fixture into `frame`; fixtures without a universe use
    /// `default_universe`.
    pub fn render(&self, elapsed_ms: u64, default_universe: u16, frame: &mut DmxFrame) {
        for fixture in self.sample(elapsed_ms) {
            let universe = fixture.universe.unwrap_or(default_universe);
            frame
                .universe_mut(universe)
                .write(fixture.start_channel, &fixture.values);
        }
    }
}
