use std::collections::HashSet;

use tokio::time::{Duration, Instant};

use crate::universe::{clamp_value, ChannelValue, UniverseState};

pub const DEFAULT_TICK: Duration = Duration::from_millis(30);

pub type FadeId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FadeChannel {
    channel: u16,
    start: u8,
    target: u8,
}

/// One in-flight fade request.
///
/// Start values are captured from the universe when the request arrives,
/// never from an older snapshot, so a superseding fade always begins where
/// the output actually is.
#[derive(Clone, Debug)]
pub struct Fade {
    id: FadeId,
    channels: Vec<FadeChannel>,
    steps: u32,
    step: u32,
    tick: Duration,
    next_due: Instant,
}

impl Fade {
    pub fn id(&self) -> FadeId {
        self.id
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn elapsed_steps(&self) -> u32 {
        self.step
    }

    pub fn channels(&self) -> impl Iterator<Item = u16> + '_ {
        self.channels.iter().map(|c| c.channel)
    }

    pub fn is_complete(&self) -> bool {
        self.step >= self.steps
    }

    /// Level of `channel` at `step`. The last step lands exactly on target.
    fn level(&self, channel: &FadeChannel, step: u32) -> u8 {
        if step >= self.steps {
            return channel.target;
        }
        let start = channel.start as f64;
        let delta = channel.target as f64 - start;
        clamp_value(start + delta * step as f64 / self.steps as f64)
    }

    fn advance(&mut self, state: &mut UniverseState) {
        self.step += 1;
        for channel in &self.channels {
            state.set(ChannelValue::new(channel.channel, self.level(channel, self.step)));
        }
        self.next_due += self.tick;
    }
}

/// Drives linear fades on the universe from an external clock.
///
/// The engine owns no timer. Its driver asks for [`FadeEngine::next_deadline`],
/// sleeps until then and calls [`FadeEngine::advance`]. Each due fade moves
/// exactly one step per call, so a late driver still produces every step.
pub struct FadeEngine {
    tick: Duration,
    fades: Vec<Fade>,
    next_id: FadeId,
}

impl FadeEngine {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick: if tick.is_zero() { DEFAULT_TICK } else { tick },
            fades: Vec::new(),
            next_id: 1,
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// `max(1, floor(fade / tick))`.
    pub fn steps_for(&self, fade: Duration) -> u32 {
        let steps = fade.as_millis() / self.tick.as_millis().max(1);
        steps.clamp(1, u32::MAX as u128) as u32
    }

    /// Write `targets` to the universe, immediately when `fade` is zero or
    /// as a new scheduled fade otherwise.
    ///
    /// In-flight fades lose every channel named in `targets` first; the most
    /// recent request always owns a channel. Returns the new fade's id, or
    /// `None` when the targets were applied immediately.
    pub fn request(
        &mut self,
        targets: &[ChannelValue],
        fade: Duration,
        state: &mut UniverseState,
        now: Instant,
    ) -> Option<FadeId> {
        let targets = dedup_last_wins(targets);
        let channels: Vec<u16> = targets.iter().map(|t| t.channel).collect();
        self.cancel_channels(&channels);

        if fade.is_zero() || targets.is_empty() {
            state.apply(&targets);
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        let fade = Fade {
            id,
            channels: targets
                .iter()
                .map(|t| FadeChannel {
                    channel: t.channel,
                    start: state.get(t.channel),
                    target: t.value,
                })
                .collect(),
            steps: self.steps_for(fade),
            step: 0,
            tick: self.tick,
            next_due: now + self.tick,
        };
        log::debug!(
            "Fade {} started on {} channels over {} steps",
            id,
            fade.channels.len(),
            fade.steps
        );
        self.fades.push(fade);
        Some(id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.fades.iter().map(|f| f.next_due).min()
    }

    /// Step every fade that is due at `now`. Returns the ids of fades that
    /// moved; completed fades are dropped after their final step.
    pub fn advance(&mut self, now: Instant, state: &mut UniverseState) -> Vec<FadeId> {
        let mut advanced = Vec::new();
        for fade in self.fades.iter_mut().filter(|f| f.next_due <= now) {
            fade.advance(state);
            advanced.push(fade.id);
        }
        self.fades.retain(|f| {
            if f.is_complete() {
                log::debug!("Fade {} complete after {} steps", f.id, f.steps);
                false
            } else {
                true
            }
        });
        advanced
    }

    /// Remove `channels` from every in-flight fade, dropping fades that end
    /// up with nothing left to drive.
    pub fn cancel_channels(&mut self, channels: &[u16]) {
        if channels.is_empty() {
            return;
        }
        let channels: HashSet<u16> = channels.iter().copied().collect();
        for fade in &mut self.fades {
            fade.channels.retain(|c| !channels.contains(&c.channel));
        }
        self.fades.retain(|f| {
            if f.channels.is_empty() {
                log::debug!("Fade {} superseded", f.id);
                false
            } else {
                true
            }
        });
    }

    pub fn cancel(&mut self, id: FadeId) -> bool {
        let before = self.fades.len();
        self.fades.retain(|f| f.id != id);
        self.fades.len() < before
    }

    pub fn clear(&mut self) {
        self.fades.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.fades.is_empty()
    }

    pub fn fades(&self) -> &[Fade] {
        &self.fades
    }
}

impl Default for FadeEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

fn dedup_last_wins(targets: &[ChannelValue]) -> Vec<ChannelValue> {
    let mut seen = HashSet::new();
    let mut unique: Vec<ChannelValue> = targets
        .iter()
        .rev()
        .filter(|t| seen.insert(t.channel))
        .copied()
        .collect();
    unique.reverse();
    unique
}
