use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};

use crate::artnet::broadcaster::Broadcaster;
use crate::fade::fade_engine::{FadeEngine, FadeId};
use crate::merge::channel_merger::{ActiveElement, ChannelMerger, MergeMode};
use crate::messages::{ConsoleCommand, ConsoleEvent};
use crate::modules::ModuleEvent;
use crate::universe::{ChannelValue, DmxBuffer, UniverseState, DMX_CHANNELS};

/// The single writer of the universe.
///
/// Every change arrives as a [`ConsoleCommand`] and is applied in order, so
/// observers and the wire only ever see fully resolved states.
pub(crate) struct Pipeline {
    state: UniverseState,
    fades: FadeEngine,
    merger: ChannelMerger,
    broadcaster: Broadcaster,
    events: broadcast::Sender<ConsoleEvent>,
    blackout: Option<DmxBuffer>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    epoch: Instant,
    last_stamp: u64,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn all_channels(value: u8) -> Vec<ChannelValue> {
    (1..=DMX_CHANNELS as u16)
        .map(|channel| ChannelValue::new(channel, value))
        .collect()
}

impl Pipeline {
    pub fn new(
        state: UniverseState,
        fade_tick: Duration,
        merge_mode: MergeMode,
        broadcaster: Broadcaster,
        events: broadcast::Sender<ConsoleEvent>,
    ) -> Self {
        Self {
            state,
            fades: FadeEngine::new(fade_tick),
            merger: ChannelMerger::new(merge_mode),
            broadcaster,
            events,
            blackout: None,
            idle_waiters: Vec::new(),
            epoch: Instant::now(),
            last_stamp: 0,
        }
    }

    /// Seed preset data before any element is engaged.
    pub fn load_preset(&mut self, preset_id: &str, values: Vec<(u16, u8)>) {
        self.merger.set_preset_data(preset_id, values);
    }

    pub fn publish(&mut self) {
        self.broadcaster.publish(&self.state);
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<ConsoleCommand>) {
        log::debug!("Pipeline running for universe {}", self.state.universe());

        loop {
            let deadline = self.fades.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ConsoleCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = wait_until(deadline) => self.tick(Instant::now()),
            }
            self.notify_idle();
        }

        // Nothing else will move the universe.
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
        log::debug!(
            "Pipeline stopped after publishing {} frames",
            self.broadcaster.frames_published()
        );
        self.broadcaster.close().await;
    }

    fn handle(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::SetChannels { values, fade } => self.write(values, fade),

            ConsoleCommand::UpdateElement { mut element, fade } => {
                self.stamp(&mut element);
                let targets = self.merger.update_element(element);
                self.write(targets, fade);
            }
            ConsoleCommand::RemoveElement { id, fade } => {
                let targets = self.merger.remove_element(&id);
                self.write(targets, fade);
            }
            ConsoleCommand::ClearElements { fade } => {
                let targets = self.merger.clear();
                self.write(targets, fade);
            }
            ConsoleCommand::SetMergeMode { mode, fade } => {
                let targets = self.merger.set_mode(mode);
                self.emit(ConsoleEvent::MergeModeChanged(mode));
                self.write(targets, fade);
            }
            ConsoleCommand::SetPresetData {
                preset_id,
                values,
                fade,
            } => {
                if let Some(targets) = self.merger.set_preset_data(&preset_id, values) {
                    self.write(targets, fade);
                }
            }
            ConsoleCommand::RemovePresetData { preset_id, fade } => {
                if let Some(targets) = self.merger.remove_preset_data(&preset_id) {
                    self.write(targets, fade);
                }
            }

            ConsoleCommand::Blackout { fade, reply } => {
                let _ = reply.send(self.blackout(fade));
            }
            ConsoleCommand::RestoreBlackout { fade, reply } => {
                let _ = reply.send(self.restore_blackout(fade));
            }
            ConsoleCommand::ClearAll { fade } => self.clear_all(fade),

            ConsoleCommand::Reconfigure(config) => {
                self.state.set_universe(config.universe);
                self.broadcaster
                    .forward(ModuleEvent::Reconfigure(config.clone()));
                self.emit(ConsoleEvent::OutputReconfigured(config));
            }

            ConsoleCommand::QueryValues(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            ConsoleCommand::QueryBlackout(reply) => {
                let _ = reply.send(self.blackout.is_some());
            }
            ConsoleCommand::QueryElements(reply) => {
                let _ = reply.send(self.merger.active_elements().to_vec());
            }
            ConsoleCommand::WaitIdle(reply) => {
                if self.fades.is_idle() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }

            ConsoleCommand::Shutdown => {}
        }
    }

    /// Immediate writes publish once; fades publish on every step.
    fn write(&mut self, values: Vec<ChannelValue>, fade: Duration) {
        if values.is_empty() {
            return;
        }

        match self
            .fades
            .request(&values, fade, &mut self.state, Instant::now())
        {
            Some(id) => {
                let channels = self
                    .fades
                    .fades()
                    .iter()
                    .find(|f| f.id() == id)
                    .map_or(0, |f| f.channels().count());
                self.emit(ConsoleEvent::FadeStarted {
                    id,
                    channels,
                    steps: self.fades.steps_for(fade),
                });
            }
            None => self.broadcaster.publish(&self.state),
        }
    }

    fn tick(&mut self, now: Instant) {
        let advanced = self.fades.advance(now, &mut self.state);
        if advanced.is_empty() {
            return;
        }
        self.broadcaster.publish(&self.state);

        let completed: Vec<FadeId> = advanced
            .into_iter()
            .filter(|id| !self.fades.fades().iter().any(|f| f.id() == *id))
            .collect();
        for id in completed {
            self.emit(ConsoleEvent::FadeCompleted { id });
        }
    }

    fn blackout(&mut self, fade: Duration) -> bool {
        if self.blackout.is_some() {
            return false;
        }
        self.blackout = Some(self.state.snapshot());
        log::info!(
            "Blackout ({} channels were lit)",
            self.state.non_zero_count()
        );
        self.write(all_channels(0), fade);
        self.emit(ConsoleEvent::BlackoutChanged(true));
        true
    }

    fn restore_blackout(&mut self, fade: Duration) -> bool {
        let Some(snapshot) = self.blackout.take() else {
            return false;
        };
        let values: Vec<ChannelValue> = snapshot
            .iter()
            .enumerate()
            .filter(|(_, value)| **value > 0)
            .map(|(index, value)| ChannelValue::new(index as u16 + 1, *value))
            .collect();
        log::info!("Restoring {} channels after blackout", values.len());
        self.write(values, fade);
        self.emit(ConsoleEvent::BlackoutChanged(false));
        true
    }

    fn clear_all(&mut self, fade: Duration) {
        if self.blackout.take().is_some() {
            self.emit(ConsoleEvent::BlackoutChanged(false));
        }
        self.merger.clear();
        self.write(all_channels(0), fade);
    }

    /// Elements without an activation stamp get one: their existing stamp
    /// when already engaged, otherwise a fresh strictly increasing one.
    fn stamp(&mut self, element: &mut ActiveElement) {
        if element.activated_at != 0 {
            return;
        }
        if let Some(existing) = self
            .merger
            .active_elements()
            .iter()
            .find(|e| e.id == element.id)
        {
            element.activated_at = existing.activated_at;
            return;
        }
        let elapsed = self.epoch.elapsed().as_millis() as u64 + 1;
        self.last_stamp = elapsed.max(self.last_stamp + 1);
        element.activated_at = self.last_stamp;
    }

    fn notify_idle(&mut self) {
        if self.fades.is_idle() && !self.idle_waiters.is_empty() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn emit(&self, event: ConsoleEvent) {
        let _ = self.events.send(event);
    }
}
