use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::artnet::network_config::{UniverseConfig, DEFAULT_BROADCAST_IP};
use crate::artnet::packet::ARTNET_PORT;
use crate::fade::fade_engine::{FadeId, DEFAULT_TICK};
use crate::merge::channel_merger::{ActiveElement, MergeMode};
use crate::universe::{ChannelValue, DmxBuffer};

/// Commands sent from console handles to the pipeline task
#[derive(Debug)]
pub enum ConsoleCommand {
    // Direct writes
    SetChannels {
        values: Vec<ChannelValue>,
        fade: Duration,
    },

    // Control elements
    UpdateElement {
        element: ActiveElement,
        fade: Duration,
    },
    RemoveElement {
        id: String,
        fade: Duration,
    },
    ClearElements {
        fade: Duration,
    },
    SetMergeMode {
        mode: MergeMode,
        fade: Duration,
    },
    SetPresetData {
        preset_id: String,
        values: Vec<(u16, u8)>,
        fade: Duration,
    },
    RemovePresetData {
        preset_id: String,
        fade: Duration,
    },

    // Blackout
    Blackout {
        fade: Duration,
        reply: oneshot::Sender<bool>,
    },
    RestoreBlackout {
        fade: Duration,
        reply: oneshot::Sender<bool>,
    },
    ClearAll {
        fade: Duration,
    },

    // Output
    Reconfigure(UniverseConfig),

    // Queries
    QueryValues(oneshot::Sender<DmxBuffer>),
    QueryBlackout(oneshot::Sender<bool>),
    QueryElements(oneshot::Sender<Vec<ActiveElement>>),
    WaitIdle(oneshot::Sender<()>),

    Shutdown,
}

/// Settings configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    // Universe settings
    pub universe: u16,
    pub broadcast_ip: String,
    pub artnet_port: u16,

    // Resolution settings
    pub merge_mode: MergeMode,
    pub fade_tick_ms: u64,

    // Output settings
    pub keepalive_ms: u64,
    pub enable_logging: bool,

    // Storage settings
    pub data_dir: PathBuf,
    pub persist_dmx_values: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            universe: 0,
            broadcast_ip: DEFAULT_BROADCAST_IP.to_string(),
            artnet_port: ARTNET_PORT,

            merge_mode: MergeMode::Htp,
            fade_tick_ms: DEFAULT_TICK.as_millis() as u64,

            keepalive_ms: 0,
            enable_logging: false,

            data_dir: PathBuf::from("./data"),
            persist_dmx_values: true,
        }
    }
}

impl Settings {
    pub fn fade_tick(&self) -> Duration {
        Duration::from_millis(self.fade_tick_ms)
    }

    pub fn universe_config(&self) -> UniverseConfig {
        UniverseConfig::new(self.universe, self.broadcast_ip.clone())
    }
}

/// Events sent from the pipeline to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    FadeStarted {
        id: FadeId,
        channels: usize,
        steps: u32,
    },
    FadeCompleted {
        id: FadeId,
    },
    MergeModeChanged(MergeMode),
    BlackoutChanged(bool),
    OutputReconfigured(UniverseConfig),
    ModuleStatus(String),
    Error(String),
}
