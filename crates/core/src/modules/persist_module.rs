use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage, ModuleResult};
use crate::show::show_store::DMX_VALUES_FILE;

pub const WRITE_INTERVAL: Duration = Duration::from_millis(250);

/// Saves the latest universe to `dmx_values.json`, coalescing bursts of
/// updates into at most one write per interval.
pub struct PersistModule {
    path: PathBuf,
    interval: Duration,
    pending: Option<Vec<u8>>,
    last_write: Option<Instant>,
    writes: u64,
    status: HashMap<String, String>,
}

impl PersistModule {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(DMX_VALUES_FILE),
            interval: WRITE_INTERVAL,
            pending: None,
            last_write: None,
            writes: 0,
            status: HashMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn next_write_at(&self, now: Instant) -> Instant {
        match self.last_write {
            Some(last) => (last + self.interval).max(now),
            None => now,
        }
    }

    /// Best effort: failures are logged and the values stay pending.
    async fn flush(&mut self) {
        let Some(values) = self.pending.take() else {
            return;
        };

        let result = async {
            if let Some(dir) = self.path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            let json = serde_json::to_string(&values)?;
            tokio::fs::write(&self.path, json).await?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        self.last_write = Some(Instant::now());
        match result {
            Ok(()) => {
                self.writes += 1;
                log::debug!("Saved DMX values to {}", self.path.display());
            }
            Err(e) => {
                log::warn!("Failed to save DMX values to {}: {}", self.path.display(), e);
                self.pending = Some(values);
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl AsyncModule for PersistModule {
    fn id(&self) -> ModuleId {
        ModuleId::Persist
    }

    async fn initialize(&mut self) -> ModuleResult {
        log::info!("Persisting DMX values to {}", self.path.display());
        self.status
            .insert("path".to_string(), self.path.display().to_string());
        self.status
            .insert("status".to_string(), "initialized".to_string());
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        _tx: mpsc::Sender<ModuleMessage>,
    ) -> ModuleResult {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(ModuleEvent::DmxOutput(_, data)) => {
                        self.pending = Some(data);
                        if deadline.is_none() {
                            deadline = Some(self.next_write_at(Instant::now()));
                        }
                    }
                    Some(ModuleEvent::Reconfigure(_)) => {}
                    Some(ModuleEvent::Shutdown) | None => break,
                },

                _ = wait_until(deadline) => {
                    deadline = None;
                    self.flush().await;
                    if self.pending.is_some() {
                        deadline = Some(Instant::now() + self.interval);
                    }
                }
            }
        }

        self.flush().await;
        log::info!("Persist module stopped after {} writes", self.writes);
        Ok(())
    }

    async fn shutdown(&mut self) -> ModuleResult {
        self.status
            .insert("status".to_string(), "shutdown".to_string());
        self.status
            .insert("writes".to_string(), self.writes.to_string());
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}
