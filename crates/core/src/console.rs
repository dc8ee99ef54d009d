use std::path::PathBuf;
use std::sync::Arc;

use luminet_fixtures::Preset;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::artnet::broadcaster::{Broadcaster, DmxUpdate};
use crate::artnet::network_config::UniverseConfig;
use crate::error::ConsoleError;
use crate::merge::channel_merger::{ActiveElement, MergeMode};
use crate::messages::{ConsoleCommand, ConsoleEvent, Settings};
use crate::modules::{DmxModule, ModuleManager, ModuleMessage, PersistModule};
use crate::patch::address_allocator::{AddressCheck, UsedRange};
use crate::pipeline::Pipeline;
use crate::show::show_store::ShowStore;
use crate::universe::{ChannelRequest, ChannelValue, DmxBuffer, UniverseState};

const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;

/// Reply to applying or clearing a preset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedPreset {
    pub message: String,
    pub channels_updated: usize,
    pub fade_ms: u64,
}

fn fade_duration(fade_ms: Option<u64>) -> Duration {
    Duration::from_millis(fade_ms.unwrap_or(0))
}

/// Handle to the resolution pipeline.
///
/// Callers never touch the universe directly: every method turns into a
/// command for the pipeline task, which applies commands one at a time.
/// Record CRUD goes through [`LightingConsole::store`]; preset changes that
/// should reach engaged elements go through [`LightingConsole::save_preset`]
/// and [`LightingConsole::delete_preset`].
pub struct LightingConsole {
    settings: Settings,
    store: Arc<Mutex<ShowStore>>,
    universe_config: RwLock<UniverseConfig>,
    module_manager: ModuleManager,
    commands: Option<mpsc::Sender<ConsoleCommand>>,
    pipeline: Option<JoinHandle<()>>,
    message_task: Option<JoinHandle<()>>,
    latest: Option<watch::Receiver<DmxBuffer>>,
    observers: Option<broadcast::Sender<DmxUpdate>>,
    events: broadcast::Sender<ConsoleEvent>,
    is_running: bool,
}

impl LightingConsole {
    /// The universe configuration persisted in the store wins over the one
    /// derived from `settings`.
    pub fn new(settings: Settings, store: ShowStore) -> Self {
        let universe_config = store
            .load_universe_config()
            .unwrap_or_else(|| settings.universe_config());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            settings,
            store: Arc::new(Mutex::new(store)),
            universe_config: RwLock::new(universe_config),
            module_manager: ModuleManager::new(),
            commands: None,
            pipeline: None,
            message_task: None,
            latest: None,
            observers: None,
            events,
            is_running: false,
        }
    }

    /// Override the universe configuration for this run without persisting it.
    pub fn with_universe_config(self, config: UniverseConfig) -> Self {
        *self.universe_config.write() = config;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> Arc<Mutex<ShowStore>> {
        self.store.clone()
    }

    /// Start the output modules and the pipeline task. The universe is
    /// seeded from the last saved values and published once.
    pub async fn initialize(&mut self) -> Result<(), ConsoleError> {
        if self.is_running {
            return Ok(());
        }
        log::info!("Initializing lighting console...");

        let config = self.universe_config.read().clone();
        config.validate().map_err(ConsoleError::InvalidConfig)?;

        let (data_dir, initial_values, presets) = {
            let store = self.store.lock();
            let presets: Vec<(String, Vec<(u16, u8)>)> = store
                .presets()
                .iter()
                .map(|p| (p.id.clone(), p.addressable_values().collect()))
                .collect();
            (
                store.data_dir().map(PathBuf::from),
                store.load_dmx_values(),
                presets,
            )
        };

        self.module_manager.register_module(Box::new(
            DmxModule::new(config.clone(), self.settings.artnet_port)
                .with_keepalive(self.settings.keepalive_ms)
                .with_frame_logging(self.settings.enable_logging),
        ));
        if self.settings.persist_dmx_values {
            if let Some(dir) = data_dir {
                self.module_manager
                    .register_module(Box::new(PersistModule::new(dir)));
            }
        }

        self.module_manager
            .initialize()
            .await
            .map_err(|e| ConsoleError::Module(e.to_string()))?;
        self.module_manager
            .start()
            .await
            .map_err(|e| ConsoleError::Module(e.to_string()))?;

        if let Some(mut message_rx) = self.module_manager.take_message_receiver() {
            let events = self.events.clone();
            self.message_task = Some(tokio::spawn(async move {
                while let Some(message) = message_rx.recv().await {
                    let event = match message {
                        ModuleMessage::Status(status) => {
                            log::info!("{}", status);
                            ConsoleEvent::ModuleStatus(status)
                        }
                        ModuleMessage::Error(error) => {
                            log::error!("{}", error);
                            ConsoleEvent::Error(error)
                        }
                    };
                    let _ = events.send(event);
                }
            }));
        }

        let mut broadcaster = Broadcaster::new();
        for (id, sender) in self.module_manager.senders() {
            broadcaster.attach_output(id, sender);
        }
        self.latest = Some(broadcaster.watch());
        self.observers = Some(broadcaster.observers());

        let state = match initial_values {
            Some(values) => UniverseState::with_values(config.universe, &values),
            None => UniverseState::new(config.universe),
        };
        let mut pipeline = Pipeline::new(
            state,
            self.settings.fade_tick(),
            self.settings.merge_mode,
            broadcaster,
            self.events.clone(),
        );
        for (id, values) in presets {
            pipeline.load_preset(&id, values);
        }
        pipeline.publish();

        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        self.pipeline = Some(tokio::spawn(pipeline.run(command_rx)));
        self.commands = Some(commands);

        self.is_running = true;
        log::info!(
            "Lighting console running: {}",
            config.get_destination(self.settings.artnet_port)
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    async fn send(&self, command: ConsoleCommand) -> Result<(), ConsoleError> {
        let commands = self.commands.as_ref().ok_or(ConsoleError::NotRunning)?;
        commands
            .send(command)
            .await
            .map_err(|_| ConsoleError::NotRunning)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ConsoleCommand,
    ) -> Result<T, ConsoleError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| ConsoleError::NotRunning)
    }

    // Direct writes

    /// Immediate single write. Out-of-range input is clamped, and the
    /// value actually written is returned.
    pub async fn set_channel(&self, channel: i64, value: f64) -> Result<ChannelValue, ConsoleError> {
        let value = ChannelValue::clamped(channel, value);
        self.send(ConsoleCommand::SetChannels {
            values: vec![value],
            fade: Duration::ZERO,
        })
        .await?;
        Ok(value)
    }

    /// Batch write with an optional fade. Returns the number of channels
    /// requested.
    pub async fn set_channels(
        &self,
        requests: &[ChannelRequest],
        fade_ms: Option<u64>,
    ) -> Result<usize, ConsoleError> {
        let values: Vec<ChannelValue> = requests.iter().map(ChannelRequest::clamped).collect();
        let count = values.len();
        self.send(ConsoleCommand::SetChannels {
            values,
            fade: fade_duration(fade_ms),
        })
        .await?;
        Ok(count)
    }

    // Presets

    /// Write a preset's stored values. The fade is the requested one, else
    /// the preset's own default, else immediate.
    pub async fn apply_preset(
        &self,
        preset_id: &str,
        fade_ms: Option<u64>,
    ) -> Result<AppliedPreset, ConsoleError> {
        let (name, targets, fade_ms) = self.preset_targets(preset_id, fade_ms, false)?;
        let channels_updated = targets.len();
        self.send(ConsoleCommand::SetChannels {
            values: targets,
            fade: Duration::from_millis(fade_ms),
        })
        .await?;

        Ok(AppliedPreset {
            message: format!("Applied preset \"{}\"", name),
            channels_updated,
            fade_ms,
        })
    }

    /// Write zero to every channel the preset stores.
    pub async fn clear_preset(
        &self,
        preset_id: &str,
        fade_ms: Option<u64>,
    ) -> Result<AppliedPreset, ConsoleError> {
        let (name, targets, fade_ms) = self.preset_targets(preset_id, fade_ms, true)?;
        let channels_updated = targets.len();
        self.send(ConsoleCommand::SetChannels {
            values: targets,
            fade: Duration::from_millis(fade_ms),
        })
        .await?;

        Ok(AppliedPreset {
            message: format!("Cleared preset \"{}\"", name),
            channels_updated,
            fade_ms,
        })
    }

    fn preset_targets(
        &self,
        preset_id: &str,
        fade_ms: Option<u64>,
        zero: bool,
    ) -> Result<(String, Vec<ChannelValue>, u64), ConsoleError> {
        let store = self.store.lock();
        let preset = store.preset(preset_id)?;
        let targets = preset
            .addressable_values()
            .map(|(channel, value)| ChannelValue::new(channel, if zero { 0 } else { value }))
            .collect();
        let fade_ms = fade_ms.or(preset.fade_ms).unwrap_or(0);
        Ok((preset.name.clone(), targets, fade_ms))
    }

    /// Create or update a preset and refresh any engaged element using it.
    pub async fn save_preset(&self, preset: Preset) -> Result<Preset, ConsoleError> {
        let saved = {
            let mut store = self.store.lock();
            if !preset.id.is_empty() && store.preset(&preset.id).is_ok() {
                let id = preset.id.clone();
                store.update_preset(&id, preset)?
            } else {
                store.create_preset(preset)?
            }
        };

        if self.is_running {
            self.send(ConsoleCommand::SetPresetData {
                preset_id: saved.id.clone(),
                values: saved.addressable_values().collect(),
                fade: Duration::ZERO,
            })
            .await?;
        }
        Ok(saved)
    }

    pub async fn delete_preset(&self, preset_id: &str) -> Result<Preset, ConsoleError> {
        let deleted = self.store.lock().delete_preset(preset_id)?;
        if self.is_running {
            self.send(ConsoleCommand::RemovePresetData {
                preset_id: deleted.id.clone(),
                fade: Duration::ZERO,
            })
            .await?;
        }
        Ok(deleted)
    }

    // Addressing

    pub fn check_addresses(
        &self,
        universe: u16,
        template_id: &str,
        quantity: usize,
        start_address: Option<u16>,
    ) -> Result<AddressCheck, ConsoleError> {
        let store = self.store.lock();
        let width = store.template(template_id)?.channel_count;
        let result = store
            .allocator()
            .find_bulk(universe, width, quantity, start_address.unwrap_or(1));
        if let Err(e) = &result {
            log::debug!("Address check for {} x {} failed: {}", quantity, template_id, e);
        }
        Ok(AddressCheck::from_result(width, result))
    }

    pub fn used_addresses(&self, universe: u16) -> Vec<UsedRange> {
        self.store.lock().allocator().used_ranges(universe)
    }

    /// Drive every channel of a patched fixture to its home value.
    pub async fn home_patch(&self, patch_id: &str, fade_ms: Option<u64>) -> Result<usize, ConsoleError> {
        let targets: Vec<ChannelValue> = {
            let store = self.store.lock();
            let patch = store.patch(patch_id)?;
            let template = store.template(&patch.template_id)?;
            template
                .home_values(patch.start_address)
                .into_iter()
                .map(|(channel, value)| ChannelValue::new(channel, value))
                .collect()
        };
        let count = targets.len();
        self.send(ConsoleCommand::SetChannels {
            values: targets,
            fade: fade_duration(fade_ms),
        })
        .await?;
        Ok(count)
    }

    // Observation

    /// Snapshot taken after every previously issued command has been applied.
    pub async fn current_values(&self) -> Result<DmxBuffer, ConsoleError> {
        self.request(ConsoleCommand::QueryValues).await
    }

    /// Latest published universe, without a round trip to the pipeline.
    pub fn values_watch(&self) -> Result<watch::Receiver<DmxBuffer>, ConsoleError> {
        self.latest.clone().ok_or(ConsoleError::NotRunning)
    }

    /// Live feed of every resolved change.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<DmxUpdate>, ConsoleError> {
        self.observers
            .as_ref()
            .map(|observers| observers.subscribe())
            .ok_or(ConsoleError::NotRunning)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.events.subscribe()
    }

    // Universe configuration

    pub fn universe_config(&self) -> UniverseConfig {
        self.universe_config.read().clone()
    }

    /// Validate, persist and apply a new universe configuration. The output
    /// socket is rebuilt when the console is running.
    pub async fn update_universe_config(
        &self,
        config: UniverseConfig,
    ) -> Result<UniverseConfig, ConsoleError> {
        config.validate().map_err(ConsoleError::InvalidConfig)?;

        *self.universe_config.write() = config.clone();
        self.store.lock().save_universe_config(&config);
        log::info!(
            "Universe config updated: {}",
            config.get_destination(self.settings.artnet_port)
        );

        if self.is_running {
            self.send(ConsoleCommand::Reconfigure(config.clone())).await?;
        }
        Ok(config)
    }

    // Control elements

    /// Engage or move a control element. An `activated_at` of 0 asks the
    /// console to stamp it.
    pub async fn update_element(
        &self,
        element: ActiveElement,
        fade_ms: Option<u64>,
    ) -> Result<(), ConsoleError> {
        self.send(ConsoleCommand::UpdateElement {
            element,
            fade: fade_duration(fade_ms),
        })
        .await
    }

    pub async fn remove_element(&self, id: &str, fade_ms: Option<u64>) -> Result<(), ConsoleError> {
        self.send(ConsoleCommand::RemoveElement {
            id: id.to_string(),
            fade: fade_duration(fade_ms),
        })
        .await
    }

    pub async fn clear_elements(&self) -> Result<(), ConsoleError> {
        self.send(ConsoleCommand::ClearElements {
            fade: Duration::ZERO,
        })
        .await
    }

    pub async fn set_merge_mode(&self, mode: MergeMode) -> Result<(), ConsoleError> {
        self.send(ConsoleCommand::SetMergeMode {
            mode,
            fade: Duration::ZERO,
        })
        .await
    }

    pub async fn active_elements(&self) -> Result<Vec<ActiveElement>, ConsoleError> {
        self.request(ConsoleCommand::QueryElements).await
    }

    // Blackout

    /// Returns false when already blacked out.
    pub async fn blackout(&self, fade_ms: Option<u64>) -> Result<bool, ConsoleError> {
        let fade = fade_duration(fade_ms);
        self.request(|reply| ConsoleCommand::Blackout { fade, reply })
            .await
    }

    /// Returns false when there was no blackout to restore.
    pub async fn restore_blackout(&self, fade_ms: Option<u64>) -> Result<bool, ConsoleError> {
        let fade = fade_duration(fade_ms);
        self.request(|reply| ConsoleCommand::RestoreBlackout { fade, reply })
            .await
    }

    pub async fn is_blacked_out(&self) -> Result<bool, ConsoleError> {
        self.request(ConsoleCommand::QueryBlackout).await
    }

    /// Leave blackout, release every element and zero the universe.
    pub async fn clear_all(&self, fade_ms: Option<u64>) -> Result<(), ConsoleError> {
        self.send(ConsoleCommand::ClearAll {
            fade: fade_duration(fade_ms),
        })
        .await
    }

    /// Resolves once no fade is in flight.
    pub async fn wait_for_fades(&self) -> Result<(), ConsoleError> {
        self.request(ConsoleCommand::WaitIdle).await
    }

    /// Stop the pipeline, then the modules. Pending output is flushed.
    pub async fn shutdown(&mut self) -> Result<(), ConsoleError> {
        if !self.is_running {
            return Ok(());
        }
        log::info!("Shutting down lighting console...");

        if let Some(commands) = self.commands.take() {
            let _ = commands.send(ConsoleCommand::Shutdown).await;
        }
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.await {
                log::error!("Pipeline task failed: {}", e);
            }
        }

        self.module_manager
            .shutdown()
            .await
            .map_err(|e| ConsoleError::Module(e.to_string()))?;

        if let Some(task) = self.message_task.take() {
            task.abort();
        }
        self.latest = None;
        self.observers = None;
        self.is_running = false;
        log::info!("Lighting console shutdown complete");
        Ok(())
    }
}
