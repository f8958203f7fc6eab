//! `ConnectionActor` - outbound side of one client connection.
//!
//! Each `ConnectionActor`:
//! - Owns the session's notification slots (slot -> subscription id)
//! - Serializes responses, events and slot pushes into text frames
//! - Writes them, in order, to the transport's outbound channel
//!
//! Venue actors push snapshots with [`ConnectionHandle::push`], which never
//! waits: a full mailbox drops the push and counts it. Pushes for slots the
//! session has not subscribed are discarded here.

use super::messages::{ConnectionMessage, Slot};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::VenueError;
use crate::observability::metrics;
use crate::protocol::Frame;
use common::types::ConnectionId;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
}

impl ConnectionHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Push a snapshot without waiting.
    pub fn push(&self, slot: Slot, payload: Value) {
        self.try_deliver(slot.as_str(), ConnectionMessage::Push { slot, payload });
    }

    /// Send an event without waiting.
    pub fn event(&self, subject: &'static str, data: Value) {
        self.try_deliver(subject, ConnectionMessage::Event { subject, data });
    }

    fn try_deliver(&self, label: &'static str, message: ConnectionMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::record_push_dropped(label);
                warn!(
                    target: "venue.actor.connection",
                    connection_id = %self.connection_id,
                    subject = label,
                    "Connection mailbox full, push dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                error!(
                    target: "venue.actor.connection",
                    connection_id = %self.connection_id,
                    subject = label,
                    "Send to inactive session ignored"
                );
            }
        }
    }

    /// Send a response frame.
    pub async fn respond(&self, frame: Frame) -> Result<(), VenueError> {
        self.send(ConnectionMessage::Respond { frame }).await
    }

    /// Attach `slot` to a subscription, replacing any previous one.
    pub async fn subscribe(&self, slot: Slot, subscription_id: String) -> Result<(), VenueError> {
        self.send(ConnectionMessage::Subscribe {
            slot,
            subscription_id,
        })
        .await
    }

    pub async fn unsubscribe(&self, slot: Slot) -> Result<(), VenueError> {
        self.send(ConnectionMessage::Unsubscribe { slot }).await
    }

    async fn send(&self, message: ConnectionMessage) -> Result<(), VenueError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| VenueError::Internal(format!("channel send failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Serialized frames for the transport writer.
    outbound: mpsc::Sender<String>,
    /// Active subscription id per slot.
    slots: BTreeMap<Slot, String>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor writing to `outbound`.
    pub fn spawn(
        connection_id: ConnectionId,
        outbound: mpsc::Sender<String>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            connection_id,
            receiver,
            outbound,
            slots: BTreeMap::new(),
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "venue.actor.connection", fields(connection_id = %self.connection_id))]
    async fn run(mut self) {
        debug!(
            target: "venue.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "venue.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let keep_going = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if !keep_going {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // Every subscription ends with the connection.
        self.slots.clear();

        info!(
            target: "venue.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle one message. Returns false when the actor should stop.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Push { slot, payload } => match self.slots.get(&slot) {
                Some(subscription_id) => {
                    let frame = Frame::push(subscription_id.clone(), slot.subject(), payload);
                    self.write(&frame).await
                }
                None => true,
            },
            ConnectionMessage::Event { subject, data } => {
                self.write(&Frame::event(subject, data)).await
            }
            ConnectionMessage::Respond { frame } => self.write(&frame).await,
            ConnectionMessage::Subscribe {
                slot,
                subscription_id,
            } => {
                if let Some(previous) = self.slots.insert(slot, subscription_id) {
                    debug!(
                        target: "venue.actor.connection",
                        connection_id = %self.connection_id,
                        slot = slot.as_str(),
                        previous = %previous,
                        "Subscription replaced"
                    );
                }
                true
            }
            ConnectionMessage::Unsubscribe { slot } => {
                self.slots.remove(&slot);
                true
            }
        }
    }

    /// Serialize and write a frame. Returns false if the transport is gone.
    async fn write(&self, frame: &Frame) -> bool {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                error!(
                    target: "venue.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to serialize frame"
                );
                return true;
            }
        };
        if self.outbound.send(text).await.is_err() {
            debug!(
                target: "venue.actor.connection",
                connection_id = %self.connection_id,
                "Transport closed"
            );
            return false;
        }
        true
    }
}
