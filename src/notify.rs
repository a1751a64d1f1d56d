use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-lab broadcast of schedule changes, for live timetable views.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on one lab. Creates the channel if needed; callers check
    /// the lab exists (see `Store::subscribe`).
    pub fn subscribe(&self, lab_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(lab_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event to its lab's channel. No-op for events without a lab or
    /// when nobody is listening. Channels whose receivers are all gone are dropped.
    pub fn send(&self, event: &Event) {
        let Some(lab_id) = event.lab_id() else { return };
        if let Some(sender) = self.channels.get(&lab_id) {
            let _ = sender.send(event.clone());
        }
        if matches!(event, Event::LabDeleted { .. }) {
            self.channels.remove(&lab_id);
        } else {
            self.channels
                .remove_if(&lab_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
