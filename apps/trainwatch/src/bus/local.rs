//! In-process bus.

use super::{Bus, Message, SubscriberTable};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use trainwatch_core::TrainError;

/// Topic fan-out inside one process.
///
/// Clones share the same subscribers. Every published message is also kept
/// in a log, which is how tests and offline runs observe announcements.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    subscribers: Arc<SubscriberTable>,
    log: Arc<Mutex<Vec<Message>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, oldest first.
    pub fn published(&self) -> Vec<Message> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages published on `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

impl Bus for LocalBus {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), TrainError> {
        let message = Message::new(topic, payload);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        self.subscribers.deliver(&message);
        Ok(())
    }

    fn subscribe(&self, topic: &str, sink: UnboundedSender<Message>) -> Result<(), TrainError> {
        self.subscribers.add(topic, sink);
        Ok(())
    }
}
