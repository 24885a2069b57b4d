//! # Coordination Gateway
//!
//! Gates stage announcements on a readiness ping from the device.
//!
//! ## Protocol
//!
//! ```text
//!   Idle ──announce──▶ WaitingForPing ──ping──▶ Published ──publish──▶ Idle
//!                            │
//!                            └──timeout──▶ Idle (nothing published)
//! ```
//!
//! Pings that arrive while no announcement is pending are ignored. The stage
//! published is read from the session after the ping, under its lock, so a
//! stage change during the wait is never announced stale, and a finished
//! session is never announced at all.

use crate::bus::{Bus, Message, Topics};
use crate::runtime::SharedSession;
use crate::sinks::PassthroughSink;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{oneshot, watch};
use trainwatch_core::{Stage, TrainError};

// =============================================================================
// STATE
// =============================================================================

/// Observable phase of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPhase {
    Idle,
    WaitingForPing,
    Published,
}

enum HandshakeState {
    Idle,
    /// The rendezvous: a ping completes the sender.
    WaitingForPing(oneshot::Sender<()>),
    Published,
}

impl HandshakeState {
    fn phase(&self) -> GatewayPhase {
        match self {
            HandshakeState::Idle => GatewayPhase::Idle,
            HandshakeState::WaitingForPing(_) => GatewayPhase::WaitingForPing,
            HandshakeState::Published => GatewayPhase::Published,
        }
    }
}

/// How one announcement attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    /// The device pinged and the stage went out.
    Published(Stage),
    /// No ping within the handshake bound; nothing was published.
    TimedOut,
    /// The session is over; nothing is announced any more.
    SessionFinished,
}

// =============================================================================
// GATEWAY
// =============================================================================

/// Handshake and announcement state for one subject.
pub struct Gateway {
    topics: Topics,
    bus: Arc<dyn Bus>,
    session: SharedSession,
    passthrough: PassthroughSink,
    timeout: Duration,
    state: Mutex<HandshakeState>,
}

impl Gateway {
    pub fn new(
        topics: Topics,
        bus: Arc<dyn Bus>,
        session: SharedSession,
        passthrough: PassthroughSink,
        timeout: Duration,
    ) -> Self {
        Self {
            topics,
            bus,
            session,
            passthrough,
            timeout,
            state: Mutex::new(HandshakeState::Idle),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn phase(&self) -> GatewayPhase {
        self.lock_state().phase()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HandshakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: HandshakeState) {
        *self.lock_state() = state;
    }

    /// Subscribe to the request and data topics.
    ///
    /// Returns the inbox the listener drains.
    pub fn subscribe(&self) -> Result<UnboundedReceiver<Message>, TrainError> {
        let (sink, inbox) = mpsc::unbounded_channel();
        self.bus.subscribe(&self.topics.request, sink.clone())?;
        self.bus.subscribe(&self.topics.data, sink)?;
        Ok(inbox)
    }

    /// Complete a pending handshake.
    ///
    /// Returns `false` when no announcement was waiting; the ping is dropped.
    pub fn ping(&self) -> bool {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, HandshakeState::Idle) {
            HandshakeState::WaitingForPing(rendezvous) => {
                *state = HandshakeState::Published;
                // The waiter may have timed out in the meantime.
                rendezvous.send(()).is_ok()
            }
            other => {
                *state = other;
                false
            }
        }
    }

    /// Route one inbound message.
    pub async fn handle(&self, message: Message) {
        if message.topic == self.topics.request {
            if message.is_ping() {
                if !self.ping() {
                    tracing::debug!("Ping received while idle; ignored");
                }
            } else {
                tracing::debug!(payload = %message.payload, "Non-ping request ignored");
            }
            return;
        }

        if let Err(e) = self.passthrough.append(&message.payload).await {
            tracing::warn!(topic = %message.topic, "Device data not saved: {}", e);
        }
    }

    /// Wait for a ping, then publish the session's current stage.
    pub async fn announce(&self) -> Result<Announcement, TrainError> {
        if self.session.lock().await.is_finished() {
            return Ok(Announcement::SessionFinished);
        }

        let (rendezvous, pinged) = oneshot::channel();
        self.set_state(HandshakeState::WaitingForPing(rendezvous));
        tracing::debug!(timeout_secs = self.timeout.as_secs(), "Waiting for ping");

        let outcome = tokio::time::timeout(self.timeout, pinged).await;
        let result = match outcome {
            Ok(Ok(())) => self.publish_current().await,
            Ok(Err(_)) | Err(_) => {
                let waited_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                let err = TrainError::CoordinationTimeout { waited_ms };
                tracing::warn!("{}; stage not published", err);
                Ok(Announcement::TimedOut)
            }
        };
        self.set_state(HandshakeState::Idle);
        result
    }

    async fn publish_current(&self) -> Result<Announcement, TrainError> {
        let stage = {
            let session = self.session.lock().await;
            if session.is_finished() {
                return Ok(Announcement::SessionFinished);
            }
            session.stage()
        };
        self.bus.publish(&self.topics.stage, stage.as_str())?;
        tracing::info!(stage = %stage, topic = %self.topics.stage, "Stage published");
        Ok(Announcement::Published(stage))
    }

    // =========================================================================
    // TASKS
    // =========================================================================

    /// Drain the inbox until it closes or shutdown is signalled.
    pub async fn run_listener(
        self: Arc<Self>,
        mut inbox: UnboundedReceiver<Message>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Gateway listener stopped");
    }

    /// Serve announcement requests.
    ///
    /// A request stays pending until its stage is published: after a timeout
    /// or a failed publish the handshake is re-armed for the next ping.
    /// Requests arriving while one is pending are coalesced into one
    /// follow-up announcement.
    pub async fn run_announcer(
        self: Arc<Self>,
        mut requests: watch::Receiver<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        'serve: loop {
            tokio::select! {
                changed = requests.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let _generation = *requests.borrow_and_update();
                }
                _ = shutdown.changed() => break,
            }

            loop {
                let outcome = tokio::select! {
                    outcome = self.announce() => outcome,
                    _ = shutdown.changed() => break 'serve,
                };
                match outcome {
                    Ok(Announcement::Published(_)) => break,
                    Ok(Announcement::SessionFinished) => break 'serve,
                    Ok(Announcement::TimedOut) => {
                        tracing::debug!("Re-arming handshake for the pending announcement");
                    }
                    Err(e) => tracing::warn!("Announcement failed; retrying: {}", e),
                }
            }
        }
        self.set_state(HandshakeState::Idle);
        tracing::debug!("Gateway announcer stopped");
    }
}

/// Ask the announcer for another announcement.
pub fn request_announcement(requests: &watch::Sender<u64>) {
    requests.send_modify(|generation| *generation = generation.wrapping_add(1));
}
