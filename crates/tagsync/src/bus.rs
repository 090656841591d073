use tokio::sync::broadcast;

use crate::event::SyncEvent;

#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Sends `event` to every current subscriber and returns how many
    /// received it. Events published with no subscribers are dropped.
    pub fn publish(&self, event: SyncEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}
