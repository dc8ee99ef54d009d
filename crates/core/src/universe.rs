use serde::{Deserialize, Serialize};

pub use luminet_fixtures::DMX_CHANNELS;

/// A full universe worth of channel levels, index 0 is channel 1.
pub type DmxBuffer = [u8; DMX_CHANNELS];

/// A channel write as it arrives from the outside world. Numbers may be out
/// of range (fader drags overshoot); they are clamped, never rejected.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub channel: i64,
    pub value: f64,
}

impl ChannelRequest {
    pub fn new(channel: i64, value: f64) -> Self {
        Self { channel, value }
    }

    pub fn clamped(&self) -> ChannelValue {
        ChannelValue::clamped(self.channel, self.value)
    }
}

/// A channel write after boundary clamping: channel in 1..=512, any u8 value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelValue {
    pub channel: u16,
    pub value: u8,
}

impl ChannelValue {
    pub fn new(channel: u16, value: u8) -> Self {
        Self::clamped(channel as i64, value as f64)
    }

    pub fn clamped(channel: i64, value: f64) -> Self {
        Self {
            channel: clamp_channel(channel),
            value: clamp_value(value),
        }
    }

    fn index(&self) -> usize {
        self.channel as usize - 1
    }
}

pub fn clamp_channel(channel: i64) -> u16 {
    channel.clamp(1, DMX_CHANNELS as i64) as u16
}

/// `clamp(round(value), 0, 255)`; NaN lands on 0.
pub fn clamp_value(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// The authoritative output array for the configured universe.
///
/// Only the resolution pipeline holds one of these mutably; everyone else
/// sees copies handed out through the broadcaster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseState {
    universe: u16,
    channels: DmxBuffer,
}

impl UniverseState {
    pub fn new(universe: u16) -> Self {
        Self {
            universe,
            channels: [0; DMX_CHANNELS],
        }
    }

    /// Seed from previously persisted levels. Short input is zero-padded,
    /// long input truncated.
    pub fn with_values(universe: u16, values: &[u8]) -> Self {
        let mut state = Self::new(universe);
        let len = values.len().min(DMX_CHANNELS);
        state.channels[..len].copy_from_slice(&values[..len]);
        state
    }

    pub fn universe(&self) -> u16 {
        self.universe
    }

    pub fn set_universe(&mut self, universe: u16) {
        self.universe = universe;
    }

    pub fn get(&self, channel: u16) -> u8 {
        self.channels[clamp_channel(channel as i64) as usize - 1]
    }

    /// Returns true when the stored level actually changed.
    pub fn set(&mut self, value: ChannelValue) -> bool {
        let slot = &mut self.channels[value.index()];
        let changed = *slot != value.value;
        *slot = value.value;
        changed
    }

    pub fn apply(&mut self, values: &[ChannelValue]) -> bool {
        values.iter().fold(false, |changed, v| self.set(*v) | changed)
    }

    pub fn snapshot(&self) -> DmxBuffer {
        self.channels
    }

    pub fn non_zero_count(&self) -> usize {
        self.channels.iter().filter(|v| **v > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping_at_the_boundary() {
        assert_eq!(ChannelValue::clamped(0, 12.0), ChannelValue { channel: 1, value: 12 });
        assert_eq!(ChannelValue::clamped(600, 300.0), ChannelValue { channel: 512, value: 255 });
        assert_eq!(ChannelValue::clamped(-4, -20.0).value, 0);
        assert_eq!(clamp_value(127.5), 128);
        assert_eq!(clamp_value(127.49), 127);
        assert_eq!(clamp_value(f64::NAN), 0);
    }

    #[test]
    fn test_set_reports_changes() {
        let mut state = UniverseState::new(0);
        assert!(state.set(ChannelValue::new(5, 100)));
        assert!(!state.set(ChannelValue::new(5, 100)));
        assert_eq!(state.get(5), 100);
        assert_eq!(state.snapshot()[4], 100);
        assert_eq!(state.non_zero_count(), 1);
    }

    #[test]
    fn test_seeding_pads_and_truncates() {
        let state = UniverseState::with_values(2, &[1, 2, 3]);
        assert_eq!(state.get(3), 3);
        assert_eq!(state.get(4), 0);

        let long = vec![9u8; 600];
        let state = UniverseState::with_values(2, &long);
        assert_eq!(state.get(512), 9);
    }
}
