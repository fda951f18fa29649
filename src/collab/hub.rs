use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::sync::broadcast;

use super::messages::CollabMessage;

const TOPIC_CAPACITY: usize = 256;

/// In-process stand-in for the external publish/subscribe channel: one
/// broadcast topic per translation unit. Every session connected to a unit
/// sees every message published to it, including its own (receivers filter
/// by session id).
#[derive(Clone, Default)]
pub struct CollabHub {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<CollabMessage>>>>,
}

impl CollabHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, unit_id: &str) -> broadcast::Receiver<CollabMessage> {
        self.topic(unit_id).subscribe()
    }

    pub fn publish(&self, unit_id: &str, message: CollabMessage) {
        let sender = {
            let mut topics = self.lock_topics();
            let Some(sender) = topics.get(unit_id) else {
                return;
            };
            if sender.receiver_count() == 0 {
                // Last subscriber left; drop the topic so a long-lived hub
                // does not accumulate senders for units nobody views anymore.
                topics.remove(unit_id);
                return;
            }
            sender.clone()
        };

        if let Err(err) = sender.send(message) {
            warn!("failed to publish collab message for unit {unit_id}: {err}");
        }
    }

    fn topic(&self, unit_id: &str) -> broadcast::Sender<CollabMessage> {
        self.lock_topics()
            .entry(unit_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    fn lock_topics(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<CollabMessage>>> {
        match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    fn topic_count(&self) -> usize {
        self.lock_topics().len()
    }
}
