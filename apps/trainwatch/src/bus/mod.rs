//! # Bus Module
//!
//! Opaque publish/subscribe transport between the monitor and the device.
//!
//! ## Topics
//!
//! - `subject_<id>/stage` - stage announcements (plain-text stage id)
//! - `subject_<id>/request` - device readiness (`"ping"`)
//! - `subject_<id>/data` - device output, forwarded verbatim to disk
//!
//! ## Adapters
//!
//! - [`LocalBus`]: in-process fan-out, used in tests and offline runs
//! - [`TcpBus`]: line-oriented client for a broker endpoint

mod local;
mod tcp;

pub use local::LocalBus;
pub use tcp::TcpBus;

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use trainwatch_core::TrainError;

/// Payload the device sends when it is ready for a stage announcement.
pub const PING: &str = "ping";

// =============================================================================
// MESSAGES AND TOPICS
// =============================================================================

/// One message on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Whether this is a readiness signal.
    pub fn is_ping(&self) -> bool {
        self.payload.trim() == PING
    }
}

/// Topic names for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub stage: String,
    pub request: String,
    pub data: String,
}

impl Topics {
    pub fn for_subject(subject: &str) -> Self {
        Self {
            stage: format!("subject_{}/stage", subject),
            request: format!("subject_{}/request", subject),
            data: format!("subject_{}/data", subject),
        }
    }
}

// =============================================================================
// BUS TRAIT
// =============================================================================

/// Publish/subscribe primitive.
///
/// `publish` never blocks; delivery happens in the background for remote
/// transports.
pub trait Bus: Send + Sync {
    /// Publish `payload` on `topic`.
    fn publish(&self, topic: &str, payload: &str) -> Result<(), TrainError>;

    /// Deliver every future message on `topic` to `sink`.
    fn subscribe(&self, topic: &str, sink: UnboundedSender<Message>) -> Result<(), TrainError>;
}

// =============================================================================
// SUBSCRIBER TABLE
// =============================================================================

/// Topic to subscriber fan-out shared by the adapters.
#[derive(Debug, Default)]
struct SubscriberTable {
    topics: Mutex<BTreeMap<String, Vec<UnboundedSender<Message>>>>,
}

impl SubscriberTable {
    fn add(&self, topic: &str, sink: UnboundedSender<Message>) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics.entry(topic.to_string()).or_default().push(sink);
    }

    /// Deliver `message`, dropping subscribers whose receiver is gone.
    ///
    /// Returns the number of live subscribers reached.
    fn deliver(&self, message: &Message) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sinks) = topics.get_mut(&message.topic) else {
            return 0;
        };
        sinks.retain(|sink| sink.send(message.clone()).is_ok());
        sinks.len()
    }

    fn has_topic(&self, topic: &str) -> bool {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).is_some_and(|sinks| !sinks.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn topics_are_namespaced_by_subject() {
        let topics = Topics::for_subject("42");
        assert_eq!(topics.stage, "subject_42/stage");
        assert_eq!(topics.request, "subject_42/request");
        assert_eq!(topics.data, "subject_42/data");
    }

    #[test]
    fn ping_tolerates_whitespace() {
        assert!(Message::new("t", "ping\n").is_ping());
        assert!(!Message::new("t", "pong").is_ping());
    }

    #[test]
    fn closed_subscribers_are_dropped() {
        let table = SubscriberTable::default();
        let (tx, rx) = mpsc::unbounded_channel();
        table.add("a", tx);
        assert!(table.has_topic("a"));
        drop(rx);
        assert_eq!(table.deliver(&Message::new("a", "x")), 0);
        assert!(!table.has_topic("a"));
    }
}
