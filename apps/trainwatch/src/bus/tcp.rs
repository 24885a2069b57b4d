//! Line-oriented TCP bus client.
//!
//! Wire format, one command per line:
//!
//! ```text
//! -> SUB <topic>
//! -> PUB <topic> <payload>
//! <- MSG <topic> <payload>
//! ```

use super::{Bus, Message, SubscriberTable};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use trainwatch_core::TrainError;

/// Client connection to a line-protocol broker.
#[derive(Debug)]
pub struct TcpBus {
    endpoint: String,
    subscribers: Arc<SubscriberTable>,
    outbound: Mutex<Option<UnboundedSender<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpBus {
    /// Connect to `endpoint` (`host:port`) and start the I/O tasks.
    pub async fn connect(endpoint: &str) -> Result<Self, TrainError> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| TrainError::Bus(format!("cannot connect to {}: {}", endpoint, e)))?;
        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();
        let subscribers = Arc::new(SubscriberTable::default());

        let writer = tokio::spawn(write_loop(write_half, queue));
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&subscribers)));
        tracing::info!(endpoint, "Connected to bus broker");

        Ok(Self {
            endpoint: endpoint.to_string(),
            subscribers,
            outbound: Mutex::new(Some(outbound)),
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    /// Flush pending commands, close the connection and join the I/O tasks.
    pub async fn shutdown(&self) {
        // Dropping the sender ends the writer once its queue is drained.
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let mut tasks = tasks.into_iter();

        if let Some(writer) = tasks.next()
            && let Err(e) = writer.await
        {
            tracing::warn!("Bus writer task failed: {}", e);
        }
        for reader in tasks {
            reader.abort();
            // Cancellation is the expected outcome here.
            let _ = reader.await;
        }
        tracing::debug!(endpoint = %self.endpoint, "Bus connection closed");
    }

    fn send_line(&self, line: String) -> Result<(), TrainError> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = outbound.as_ref() else {
            return Err(TrainError::Bus(format!(
                "connection to {} is closed",
                self.endpoint
            )));
        };
        sender
            .send(line)
            .map_err(|_| TrainError::Bus(format!("connection to {} was lost", self.endpoint)))
    }
}

impl Bus for TcpBus {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), TrainError> {
        check_token("topic", topic)?;
        if payload.contains(['\n', '\r']) {
            return Err(TrainError::Bus(
                "payload may not contain line breaks".to_string(),
            ));
        }
        self.send_line(format!("PUB {} {}\n", topic, payload))
    }

    fn subscribe(&self, topic: &str, sink: UnboundedSender<Message>) -> Result<(), TrainError> {
        check_token("topic", topic)?;
        let first = !self.subscribers.has_topic(topic);
        self.subscribers.add(topic, sink);
        if first {
            self.send_line(format!("SUB {}\n", topic))?;
        }
        Ok(())
    }
}

fn check_token(what: &str, token: &str) -> Result<(), TrainError> {
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(TrainError::Bus(format!(
            "{} {:?} must be a non-empty word",
            what, token
        )));
    }
    Ok(())
}

/// Parse an inbound `MSG <topic> <payload>` line.
pub fn parse_inbound(line: &str) -> Option<Message> {
    let rest = line.strip_prefix("MSG ")?;
    let (topic, payload) = rest.split_once(' ').unwrap_or((rest, ""));
    if topic.is_empty() {
        return None;
    }
    Some(Message::new(topic, payload))
}

// =============================================================================
// I/O TASKS
// =============================================================================

async fn write_loop(mut stream: OwnedWriteHalf, mut queue: UnboundedReceiver<String>) {
    while let Some(line) = queue.recv().await {
        if let Err(e) = stream.write_all(line.as_bytes()).await {
            tracing::warn!("Bus write failed: {}", e);
            return;
        }
    }
    if let Err(e) = stream.shutdown().await {
        tracing::debug!("Bus shutdown failed: {}", e);
    }
}

async fn read_loop(stream: OwnedReadHalf, subscribers: Arc<SubscriberTable>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_inbound(&line) {
                Some(message) => {
                    subscribers.deliver(&message);
                }
                None => tracing::debug!(line = %line, "Ignoring unrecognised broker line"),
            },
            Ok(None) => {
                tracing::warn!("Bus broker closed the connection");
                return;
            }
            Err(e) => {
                tracing::warn!("Bus read failed: {}", e);
                return;
            }
        }
    }
}
