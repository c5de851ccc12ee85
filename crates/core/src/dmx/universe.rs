use std::collections::BTreeMap;

pub const DMX_CHANNELS: usize = 512;

/// One 512-channel DMX universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmxUniverse {
    channels: [u8; DMX_CHANNELS],
}

impl Default for DmxUniverse {
    fn default() -> Self {
        Self {
            channels: [0; DMX_CHANNELS],
        }
    }
}

impl DmxUniverse {
    pub fn from_slice(data: &[u8]) -> Self {
        let mut universe = Self::default();
        let len = data.len().min(DMX_CHANNELS);
        universe.channels[..len].copy_from_slice(&data[..len]);
        universe
    }

    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [u8] {
        &mut self.channels
    }

    /// Value of a 1-based channel.
    pub fn get(&self, channel: u16) -> Option<u8> {
        channel
            .checked_sub(1)
            .and_then(|index| self.channels.get(index as usize))
            .copied()
    }

    /// Writes `values` from the 1-based `start_channel`. Returns how many
    /// values did not fit.
    pub fn write(&mut self, start_channel: u16, values: &[u8]) -> usize {
        let Some(start) = (start_channel as usize).checked_sub(1) else {
            return values.len();
        };
        if start >= DMX_CHANNELS {
            return values.len();
        }
        let fit = values.len().min(DMX_CHANNELS - start);
        self.channels[start..start + fit].copy_from_slice(&values[..fit]);
        values.len() - fit
    }

    pub fn blackout(&mut self) {
        self.channels = [0; DMX_CHANNELS];
    }

    pub fn is_dark(&self) -> bool {
        self.channels.iter().all(|value| *value == 0)
    }
}

/// Channel data for every universe touched in one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmxFrame {
    universes: BTreeMap<u16, DmxUniverse>,
}

impl DmxFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn universe(&self, id: u16) -> Option<&DmxUniverse> {
        self.universes.get(&id)
    }

    pub fn universe_mut(&mut self, id: u16) -> &mut DmxUniverse {
        self.universes.entry(id).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &DmxUniverse)> {
        self.universes.iter().map(|(id, universe)| (*id, universe))
    }

    pub fn universe_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.universes.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.universes.is_empty()
    }

    pub fn blackout(&mut self) {
        self.universes.values_mut().for_each(DmxUniverse::blackout);
    }
}
