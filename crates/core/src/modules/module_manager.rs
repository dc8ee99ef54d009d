use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage, ModuleResult};

const INBOX_CAPACITY: usize = 64;
const MESSAGE_CAPACITY: usize = 256;

struct RunningModule {
    id: ModuleId,
    inbox: mpsc::Sender<ModuleEvent>,
    task: JoinHandle<()>,
}

/// Owns the output modules: initializes them, runs each in its own task
/// with a bounded inbox, and stops them in registration order.
pub struct ModuleManager {
    pending: Vec<Box<dyn AsyncModule>>,
    running: Vec<RunningModule>,
    messages_tx: mpsc::Sender<ModuleMessage>,
    messages_rx: Option<mpsc::Receiver<ModuleMessage>>,
}

impl ModuleManager {
    pub fn new() -> Self {
        let (messages_tx, messages_rx) = mpsc::channel(MESSAGE_CAPACITY);
        Self {
            pending: Vec::new(),
            running: Vec::new(),
            messages_tx,
            messages_rx: Some(messages_rx),
        }
    }

    /// A module registered twice replaces the earlier one.
    pub fn register_module(&mut self, module: Box<dyn AsyncModule>) {
        let id = module.id();
        self.pending.retain(|m| m.id() != id);
        self.pending.push(module);
    }

    /// The first module that fails aborts startup.
    pub async fn initialize(&mut self) -> ModuleResult {
        for module in &mut self.pending {
            let id = module.id();
            if let Err(e) = module.initialize().await {
                log::error!("Module {:?} failed to initialize: {}", id, e);
                return Err(format!("{:?} module: {}", id, e).into());
            }
            log::info!("Module {:?} initialized", id);
            log::debug!("Module {:?} status: {:?}", id, module.status());
        }
        Ok(())
    }

    pub async fn start(&mut self) -> ModuleResult {
        if self.is_running() {
            return Err("modules are already running".into());
        }

        for mut module in std::mem::take(&mut self.pending) {
            let id = module.id();
            let (inbox, events) = mpsc::channel(INBOX_CAPACITY);
            let messages = self.messages_tx.clone();

            let task = tokio::spawn(async move {
                if let Err(e) = module.run(events, messages.clone()).await {
                    let _ = messages
                        .send(ModuleMessage::Error(format!("{:?} module failed: {}", id, e)))
                        .await;
                }
                if let Err(e) = module.shutdown().await {
                    log::warn!("Module {:?} did not shut down cleanly: {}", id, e);
                }
            });

            self.running.push(RunningModule { id, inbox, task });
        }
        Ok(())
    }

    pub fn senders(&self) -> Vec<(ModuleId, mpsc::Sender<ModuleEvent>)> {
        self.running
            .iter()
            .map(|m| (m.id, m.inbox.clone()))
            .collect()
    }

    pub async fn send_to_module(&self, id: ModuleId, event: ModuleEvent) -> ModuleResult {
        let module = self
            .running
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| format!("module {:?} is not running", id))?;
        module
            .inbox
            .send(event)
            .await
            .map_err(|_| format!("module {:?} has stopped", id).into())
    }

    /// Status and error reports from every module. Only one taker gets it.
    pub fn take_message_receiver(&mut self) -> Option<mpsc::Receiver<ModuleMessage>> {
        self.messages_rx.take()
    }

    /// Deliver `Shutdown` to each module and wait for its task to finish.
    /// Events already queued ahead of it are still handled.
    pub async fn shutdown(&mut self) -> ModuleResult {
        if !self.is_running() {
            return Ok(());
        }
        log::info!("Stopping {} modules", self.running.len());

        for module in std::mem::take(&mut self.running) {
            if module.inbox.send(ModuleEvent::Shutdown).await.is_err() {
                log::debug!("Module {:?} had already stopped", module.id);
            }
            if let Err(e) = module.task.await {
                log::error!("Module {:?} task failed: {}", module.id, e);
            }
        }

        log::info!("All modules stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    struct RecordingModule {
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl AsyncModule for RecordingModule {
        fn id(&self) -> ModuleId {
            ModuleId::Persist
        }

        async fn initialize(&mut self) -> ModuleResult {
            self.seen.lock().push("initialize");
            Ok(())
        }

        async fn run(
            &mut self,
            mut rx: mpsc::Receiver<ModuleEvent>,
            _tx: mpsc::Sender<ModuleMessage>,
        ) -> ModuleResult {
            while let Some(event) = rx.recv().await {
                self.seen.lock().push(event.name());
                if matches!(event, ModuleEvent::Shutdown) {
                    break;
                }
            }
            Ok(())
        }

        async fn shutdown(&mut self) -> ModuleResult {
            self.seen.lock().push("shutdown complete");
            Ok(())
        }

        fn status(&self) -> HashMap<String, String> {
            HashMap::new()
        }
    }

    struct FailingModule;

    #[async_trait]
    impl AsyncModule for FailingModule {
        fn id(&self) -> ModuleId {
            ModuleId::Dmx
        }

        async fn initialize(&mut self) -> ModuleResult {
            Ok(())
        }

        async fn run(
            &mut self,
            _rx: mpsc::Receiver<ModuleEvent>,
            _tx: mpsc::Sender<ModuleMessage>,
        ) -> ModuleResult {
            Err("socket closed".into())
        }

        async fn shutdown(&mut self) -> ModuleResult {
            Ok(())
        }

        fn status(&self) -> HashMap<String, String> {
            HashMap::new()
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ModuleManager::new();
        manager.register_module(Box::new(RecordingModule { seen: seen.clone() }));

        manager.initialize().await.unwrap();
        manager.start().await.unwrap();
        assert!(manager.is_running());
        assert!(manager.start().await.is_err());
        assert_eq!(manager.senders().len(), 1);

        manager
            .send_to_module(ModuleId::Persist, ModuleEvent::DmxOutput(0, vec![0; 512]))
            .await
            .unwrap();
        assert!(manager
            .send_to_module(ModuleId::Dmx, ModuleEvent::Shutdown)
            .await
            .is_err());

        manager.shutdown().await.unwrap();
        assert!(!manager.is_running());
        assert_eq!(
            *seen.lock(),
            vec!["initialize", "dmx output", "shutdown", "shutdown complete"]
        );
    }

    #[tokio::test]
    async fn test_run_failure_is_reported() {
        let mut manager = ModuleManager::new();
        let mut messages = manager.take_message_receiver().unwrap();
        assert!(manager.take_message_receiver().is_none());

        manager.register_module(Box::new(FailingModule));
        manager.initialize().await.unwrap();
        manager.start().await.unwrap();

        match messages.recv().await {
            Some(ModuleMessage::Error(error)) => assert!(error.contains("socket closed")),
            other => panic!("unexpected message {:?}", other),
        }
        manager.shutdown().await.unwrap();
    }
}
