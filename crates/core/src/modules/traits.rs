use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::artnet::network_config::UniverseConfig;

/// Output modules known to the console. One instance of each at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleId {
    Dmx,
    Persist,
}

#[derive(Debug, Clone)]
pub enum ModuleEvent {
    /// Full universe to output (universe, 512 levels)
    DmxOutput(u16, Vec<u8>),
    /// Universe number or destination changed
    Reconfigure(UniverseConfig),
    Shutdown,
}

impl ModuleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleEvent::DmxOutput(..) => "dmx output",
            ModuleEvent::Reconfigure(_) => "reconfigure",
            ModuleEvent::Shutdown => "shutdown",
        }
    }
}

/// Reports flowing back out of the module tasks.
#[derive(Debug)]
pub enum ModuleMessage {
    Status(String),
    Error(String),
}

pub type ModuleResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A consumer of resolved frames running in its own task.
///
/// `initialize` runs before any frame is published and may fail startup;
/// `run` owns the inbox until `Shutdown` arrives or the inbox closes, and
/// `shutdown` follows once `run` returns.
#[async_trait]
pub trait AsyncModule: Send + Sync {
    fn id(&self) -> ModuleId;

    async fn initialize(&mut self) -> ModuleResult;

    async fn run(
        &mut self,
        rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> ModuleResult;

    async fn shutdown(&mut self) -> ModuleResult;

    /// Key/value diagnostics, e.g. destination and frame counters.
    fn status(&self) -> HashMap<String, String>;
}
