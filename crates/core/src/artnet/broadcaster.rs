use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::modules::{ModuleEvent, ModuleId};
use crate::universe::{DmxBuffer, UniverseState, DMX_CHANNELS};

const OBSERVER_CAPACITY: usize = 256;

/// A full-universe snapshot as pushed to live observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmxUpdate {
    pub universe: u16,
    pub values: Vec<u8>,
}

type Frame = Option<(u16, Vec<u8>)>;

/// One output module as seen from the broadcaster. A relay task feeds the
/// module inbox: queued control events first, then the newest frame.
struct OutputLink {
    id: ModuleId,
    frames: watch::Sender<Frame>,
    control: mpsc::UnboundedSender<ModuleEvent>,
    relay: JoinHandle<()>,
}

impl OutputLink {
    fn spawn(id: ModuleId, inbox: mpsc::Sender<ModuleEvent>) -> Self {
        let (frames, frame_rx) = watch::channel(None);
        let (control, control_rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(relay(id, inbox, frame_rx, control_rx));
        Self {
            id,
            frames,
            control,
            relay,
        }
    }
}

/// Runs until the module stops or the broadcaster closes the link. Frames
/// that pile up behind a slow module collapse to the newest one; control
/// events are delivered in order and never skipped.
async fn relay(
    id: ModuleId,
    inbox: mpsc::Sender<ModuleEvent>,
    mut frames: watch::Receiver<Frame>,
    mut control: mpsc::UnboundedReceiver<ModuleEvent>,
) {
    let mut control_open = true;
    loop {
        let event = tokio::select! {
            biased;
            event = control.recv(), if control_open => match event {
                Some(event) => event,
                None => {
                    control_open = false;
                    continue;
                }
            },
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames.borrow_and_update().clone();
                match frame {
                    Some((universe, data)) => ModuleEvent::DmxOutput(universe, data),
                    None => continue,
                }
            }
        };

        if inbox.send(event).await.is_err() {
            log::debug!("{:?} module has stopped, detaching", id);
            return;
        }
    }

    // Control events queued after the last frame still go out.
    while let Ok(event) = control.try_recv() {
        if inbox.send(event).await.is_err() {
            return;
        }
    }
}

/// Fans every universe change out to the output modules, live observers
/// and the latest-value watch. Never blocks the caller.
pub struct Broadcaster {
    outputs: Vec<OutputLink>,
    observers: broadcast::Sender<DmxUpdate>,
    latest: watch::Sender<DmxBuffer>,
    frames_published: u64,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        let (latest, _) = watch::channel([0u8; DMX_CHANNELS]);
        Self {
            outputs: Vec::new(),
            observers,
            latest,
            frames_published: 0,
        }
    }

    /// Must be called from within the runtime; each output gets a relay task.
    pub fn attach_output(&mut self, id: ModuleId, sender: mpsc::Sender<ModuleEvent>) {
        self.outputs.retain(|link| link.id != id);
        self.outputs.push(OutputLink::spawn(id, sender));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DmxUpdate> {
        self.observers.subscribe()
    }

    /// A sender handle that outlives moving the broadcaster into its task;
    /// call `subscribe` on it for new observers.
    pub fn observers(&self) -> broadcast::Sender<DmxUpdate> {
        self.observers.clone()
    }

    pub fn watch(&self) -> watch::Receiver<DmxBuffer> {
        self.latest.subscribe()
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published
    }

    /// Push the current universe everywhere. An output that has not taken
    /// the previous frame yet only ever sees the newest one.
    pub fn publish(&mut self, state: &UniverseState) {
        let snapshot = state.snapshot();
        self.latest.send_replace(snapshot);

        // No subscribers is not an error.
        let _ = self.observers.send(DmxUpdate {
            universe: state.universe(),
            values: snapshot.to_vec(),
        });

        self.outputs.retain(|link| {
            if link.relay.is_finished() {
                log::debug!("{:?} module has stopped, detaching", link.id);
                return false;
            }
            link.frames
                .send_replace(Some((state.universe(), snapshot.to_vec())));
            true
        });
        self.frames_published += 1;
    }

    /// Queue a control event for every attached output. It is delivered
    /// ahead of any frame not yet handed over, however far behind the
    /// module is.
    pub fn forward(&mut self, event: ModuleEvent) {
        self.outputs.retain(|link| {
            if link.control.send(event.clone()).is_err() {
                log::debug!("{:?} module has stopped, detaching", link.id);
                return false;
            }
            true
        });
    }

    /// Hand everything still pending to the modules, then stop the relays.
    pub async fn close(self) {
        for link in self.outputs {
            let OutputLink {
                id,
                frames,
                control,
                relay,
            } = link;
            drop(frames);
            drop(control);
            if let Err(e) = relay.await {
                log::error!("{:?} relay task failed: {}", id, e);
            }
        }
    }
}
