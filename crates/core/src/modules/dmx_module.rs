use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage, ModuleResult};
use crate::artnet::network_config::UniverseConfig;
use crate::artnet::output::ArtNetOutput;

/// Sends one Art-Net frame per resolved change, plus an optional
/// keepalive re-send of the last frame.
pub struct DmxModule {
    output: Option<ArtNetOutput>,
    config: UniverseConfig,
    port: u16,
    keepalive: Option<Duration>,
    log_frames: bool,
    last_frame: Option<Vec<u8>>,
    frames_sent: u64,
    send_failures: u64,
    status: HashMap<String, String>,
}

impl DmxModule {
    pub fn new(config: UniverseConfig, port: u16) -> Self {
        Self {
            output: None,
            config,
            port,
            keepalive: None,
            log_frames: false,
            last_frame: None,
            frames_sent: 0,
            send_failures: 0,
            status: HashMap::new(),
        }
    }

    /// Zero disables the keepalive.
    pub fn with_keepalive(mut self, keepalive_ms: u64) -> Self {
        self.keepalive = (keepalive_ms > 0).then(|| Duration::from_millis(keepalive_ms));
        self
    }

    pub fn with_frame_logging(mut self, enabled: bool) -> Self {
        self.log_frames = enabled;
        self
    }

    async fn send(&mut self, data: &[u8]) {
        let Some(output) = &self.output else {
            self.send_failures += 1;
            log::warn!("Art-Net output is not connected, dropping frame");
            return;
        };

        match output.send_frame(data).await {
            Ok(_) => {
                self.frames_sent += 1;
                if self.log_frames {
                    log::debug!(
                        "Sent universe {} to {}: {:?}",
                        output.universe(),
                        output.destination(),
                        &data[..data.len().min(10)]
                    );
                }
            }
            Err(e) => {
                self.send_failures += 1;
                log::warn!("Art-Net send to {} failed: {}", output.destination(), e);
            }
        }
    }

    async fn reconfigure(&mut self, config: UniverseConfig, tx: &mpsc::Sender<ModuleMessage>) {
        // The old socket goes away either way.
        self.output = None;
        self.config = config;

        match ArtNetOutput::connect(&self.config, self.port).await {
            Ok(output) => {
                log::info!(
                    "DMX output reconfigured: {}",
                    self.config.get_destination(self.port)
                );
                self.output = Some(output);
                self.update_status("running");
            }
            Err(e) => {
                log::error!("Failed to reconfigure DMX output: {}", e);
                self.update_status("disconnected");
                let _ = tx
                    .send(ModuleMessage::Error(format!("DMX reconfigure failed: {}", e)))
                    .await;
            }
        }
    }

    fn update_status(&mut self, state: &str) {
        self.status.insert("status".to_string(), state.to_string());
        self.status
            .insert("mode".to_string(), self.config.get_mode_string().to_string());
        self.status.insert(
            "destination".to_string(),
            self.config.get_destination(self.port),
        );
        self.status
            .insert("frames_sent".to_string(), self.frames_sent.to_string());
        self.status
            .insert("send_failures".to_string(), self.send_failures.to_string());
    }
}

async fn keepalive_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl AsyncModule for DmxModule {
    fn id(&self) -> ModuleId {
        ModuleId::Dmx
    }

    async fn initialize(&mut self) -> ModuleResult {
        log::info!(
            "Initializing DMX module: {}",
            self.config.get_destination(self.port)
        );

        let output = ArtNetOutput::connect(&self.config, self.port).await?;
        self.output = Some(output);
        self.update_status("initialized");

        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> ModuleResult {
        let mut keepalive = self.keepalive.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        log::info!(
            "DMX module started ({} mode)",
            self.config.get_mode_string()
        );
        let _ = tx
            .send(ModuleMessage::Status(format!(
                "DMX output to {}",
                self.config.get_destination(self.port)
            )))
            .await;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(ModuleEvent::DmxOutput(_, data)) => {
                        self.send(&data).await;
                        self.last_frame = Some(data);
                    }
                    Some(ModuleEvent::Reconfigure(config)) => {
                        self.reconfigure(config, &tx).await;
                        if let Some(frame) = self.last_frame.clone() {
                            self.send(&frame).await;
                        }
                    }
                    Some(ModuleEvent::Shutdown) | None => {
                        log::info!("DMX module received shutdown signal");
                        break;
                    }
                },

                _ = keepalive_tick(&mut keepalive) => {
                    if let Some(frame) = self.last_frame.clone() {
                        self.send(&frame).await;
                    }
                }
            }
        }

        log::info!(
            "DMX module shutting down after sending {} frames ({} failed)",
            self.frames_sent,
            self.send_failures
        );
        Ok(())
    }

    async fn shutdown(&mut self) -> ModuleResult {
        self.output = None;
        self.update_status("shutdown");
        log::info!("DMX module shutdown complete");
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}
