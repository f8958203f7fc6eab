//! `VenueActor` - per-venue actor that owns one loaded venue.
//!
//! Each `VenueActor`:
//! - Owns the [`VenueModel`] (settings, camera graph, members) and its router
//! - Applies every mutation store-first, then in memory
//! - Recomputes snapshots through the [`Projector`] and pushes the ones that
//!   changed to the sessions entitled to them
//! - Unloads itself when its last session leaves
//!
//! # Unload handshake
//!
//! When the venue becomes empty the actor:
//! 1. Tells the controller it is unloading (new loads wait)
//! 2. Closes its router on the media collaborator
//! 3. Tells the controller it is gone (waiting loads start a fresh instance)
//! 4. Drops its mailbox; queued requests fail with `VenueNotFound`

use super::connection::ConnectionHandle;
use super::messages::{
    events, ControllerMessage, JoinedVenue, Reply, Requester, SessionPlacement, Slot,
    VenueMessage, VenueStats,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::VenueError;
use crate::media::{
    ConsumerId, ConsumerInfo, MediaKind, MediaRouter, ProducerId, TransportDirection,
    TransportId, TransportInfo,
};
use crate::store::{CameraRecord, CameraUpdate, VenueRecord, VenueStore};
use crate::venue::graph::{Camera, Portal};
use crate::venue::model::{ConsumerEntry, Member};
use crate::venue::policy::{VenueInfo, VenueSettings, VenueUpdate};
use crate::venue::projection::{
    AdminVenueState, CameraState, ProjectionChanges, PublicVenueState,
};
use crate::venue::reactive::Field;
use crate::venue::{Projector, VenueModel};
use chrono::Utc;
use common::types::{CameraId, ConnectionId, Role, SenderId, VenueId};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the venue mailbox.
const VENUE_CHANNEL_BUFFER: usize = 500;

/// How often the venue checks for an empty-venue unload and for door or
/// stream times that have passed.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5);

/// A venue nobody joins within this window after loading unloads itself.
const EMPTY_VENUE_GRACE: Duration = Duration::from_secs(30);

/// Handle to a `VenueActor`.
#[derive(Clone, Debug)]
pub struct VenueHandle {
    venue_id: VenueId,
    instance: u64,
    sender: mpsc::Sender<VenueMessage>,
    cancel_token: CancellationToken,
    info: watch::Receiver<VenueInfo>,
}

impl VenueHandle {
    #[must_use]
    pub fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    /// Load generation of this venue; a reload gets a new instance.
    #[must_use]
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Latest published settings and owners. Never waits on the mailbox.
    #[must_use]
    pub fn info(&self) -> VenueInfo {
        self.info.borrow().clone()
    }

    /// True once the actor has stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Send a request and wait for its reply. A stopped actor answers
    /// `VenueNotFound`.
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> VenueMessage,
    ) -> Result<T, VenueError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| VenueError::VenueNotFound(self.venue_id.to_string()))?;
        rx.await
            .map_err(|_| VenueError::VenueNotFound(self.venue_id.to_string()))?
    }

    pub async fn add_session(
        &self,
        member: Member,
        connection: ConnectionHandle,
    ) -> Result<JoinedVenue, VenueError> {
        self.request(|respond_to| VenueMessage::AddSession {
            member,
            connection,
            respond_to,
        })
        .await
    }

    /// Remove a session. Succeeds even if the venue already unloaded.
    pub async fn remove_session(&self, connection_id: ConnectionId) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(VenueMessage::RemoveSession {
                connection_id,
                respond_to: tx,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub async fn check_access(&self, requester: Requester) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::CheckAccess {
            requester,
            respond_to,
        })
        .await
    }

    pub async fn set_display_name(
        &self,
        connection_id: ConnectionId,
        username: String,
    ) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::SetDisplayName {
            connection_id,
            username,
            respond_to,
        })
        .await
    }

    pub async fn placement(
        &self,
        connection_id: ConnectionId,
    ) -> Result<SessionPlacement, VenueError> {
        self.request(|respond_to| VenueMessage::GetPlacement {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn public_state(&self) -> Result<PublicVenueState, VenueError> {
        self.request(|respond_to| VenueMessage::GetPublicState { respond_to })
            .await
    }

    pub async fn admin_state(&self) -> Result<AdminVenueState, VenueError> {
        self.request(|respond_to| VenueMessage::GetAdminState { respond_to })
            .await
    }

    /// Push the current snapshot for `slot` to one session.
    pub async fn resend(&self, connection_id: ConnectionId, slot: Slot) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::Resend {
            connection_id,
            slot,
            respond_to,
        })
        .await
    }

    pub async fn update(&self, update: VenueUpdate) -> Result<VenueSettings, VenueError> {
        self.request(|respond_to| VenueMessage::Update { update, respond_to })
            .await
    }

    pub async fn create_camera(
        &self,
        name: String,
        sender_id: Option<SenderId>,
    ) -> Result<CameraRecord, VenueError> {
        self.request(|respond_to| VenueMessage::CreateCamera {
            name,
            sender_id,
            respond_to,
        })
        .await
    }

    pub async fn update_camera(
        &self,
        camera_id: CameraId,
        update: CameraUpdate,
    ) -> Result<CameraRecord, VenueError> {
        self.request(|respond_to| VenueMessage::UpdateCamera {
            camera_id,
            update,
            respond_to,
        })
        .await
    }

    pub async fn delete_camera(&self, camera_id: CameraId) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::DeleteCamera {
            camera_id,
            respond_to,
        })
        .await
    }

    pub async fn upsert_portal(
        &self,
        from: CameraId,
        to: CameraId,
        portal: Portal,
    ) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::UpsertPortal {
            from,
            to,
            portal,
            respond_to,
        })
        .await
    }

    pub async fn delete_portal(&self, from: CameraId, to: CameraId) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::DeletePortal {
            from,
            to,
            respond_to,
        })
        .await
    }

    pub async fn set_sender_for_camera(
        &self,
        sender_id: SenderId,
        camera_id: CameraId,
    ) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::SetSenderForCamera {
            sender_id,
            camera_id,
            respond_to,
        })
        .await
    }

    pub async fn set_main_audio_camera(
        &self,
        camera_id: Option<CameraId>,
    ) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::SetMainAudioCamera {
            camera_id,
            respond_to,
        })
        .await
    }

    pub async fn join_camera(
        &self,
        connection_id: ConnectionId,
        camera_id: CameraId,
    ) -> Result<CameraState, VenueError> {
        self.request(|respond_to| VenueMessage::JoinCamera {
            connection_id,
            camera_id,
            respond_to,
        })
        .await
    }

    pub async fn leave_camera(&self, connection_id: ConnectionId) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::LeaveCamera {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn camera_state(&self, connection_id: ConnectionId) -> Result<CameraState, VenueError> {
        self.request(|respond_to| VenueMessage::GetCameraState {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn enter_subspace(&self, connection_id: ConnectionId) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::EnterSubSpace {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn leave_subspace(&self, connection_id: ConnectionId) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::LeaveSubSpace {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn router_capabilities(&self) -> Result<Value, VenueError> {
        self.request(|respond_to| VenueMessage::GetRouterCapabilities { respond_to })
            .await
    }

    pub async fn set_rtp_capabilities(
        &self,
        connection_id: ConnectionId,
        rtp_capabilities: Value,
    ) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::SetRtpCapabilities {
            connection_id,
            rtp_capabilities,
            respond_to,
        })
        .await
    }

    pub async fn create_transport(
        &self,
        connection_id: ConnectionId,
        direction: TransportDirection,
    ) -> Result<TransportInfo, VenueError> {
        self.request(|respond_to| VenueMessage::CreateTransport {
            connection_id,
            direction,
            respond_to,
        })
        .await
    }

    pub async fn connect_transport(
        &self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        dtls_parameters: Value,
    ) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::ConnectTransport {
            connection_id,
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await
    }

    pub async fn create_producer(
        &self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerId, VenueError> {
        self.request(|respond_to| VenueMessage::CreateProducer {
            connection_id,
            transport_id,
            kind,
            rtp_parameters,
            respond_to,
        })
        .await
    }

    pub async fn create_consumer(
        &self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        producer_id: ProducerId,
    ) -> Result<ConsumerInfo, VenueError> {
        self.request(|respond_to| VenueMessage::CreateConsumer {
            connection_id,
            transport_id,
            producer_id,
            respond_to,
        })
        .await
    }

    pub async fn close_producer(
        &self,
        connection_id: ConnectionId,
        producer_id: ProducerId,
    ) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::CloseProducer {
            connection_id,
            producer_id,
            respond_to,
        })
        .await
    }

    pub async fn close_consumer(
        &self,
        connection_id: ConnectionId,
        consumer_id: ConsumerId,
    ) -> Result<(), VenueError> {
        self.request(|respond_to| VenueMessage::CloseConsumer {
            connection_id,
            consumer_id,
            respond_to,
        })
        .await
    }

    pub async fn stats(&self) -> Result<VenueStats, VenueError> {
        self.request(|respond_to| VenueMessage::GetStats { respond_to })
            .await
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// Consumer removed from a receiver's media state.
struct ReleasedConsumer {
    connection_id: ConnectionId,
    consumer_id: ConsumerId,
    entry: ConsumerEntry,
}

/// The `VenueActor` implementation.
pub struct VenueActor {
    venue_id: VenueId,
    instance: u64,
    receiver: mpsc::Receiver<VenueMessage>,
    cancel_token: CancellationToken,
    model: VenueModel,
    projector: Projector,
    router: Arc<dyn MediaRouter>,
    store: Arc<dyn VenueStore>,
    /// Outbound handle per joined session.
    connections: BTreeMap<ConnectionId, ConnectionHandle>,
    controller: mpsc::Sender<ControllerMessage>,
    info_tx: watch::Sender<VenueInfo>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
    /// Set while the venue has no members.
    empty_since: Option<Instant>,
    unloaded: bool,
    router_closed: bool,
}

impl VenueActor {
    /// Spawn an actor for a freshly read venue record.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        record: &VenueRecord,
        instance: u64,
        router: Arc<dyn MediaRouter>,
        store: Arc<dyn VenueStore>,
        controller: mpsc::Sender<ControllerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (VenueHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(VENUE_CHANNEL_BUFFER);
        let (info_tx, info_rx) = watch::channel(record.info());
        let venue_id = record.id;

        let mut actor = Self {
            venue_id,
            instance,
            receiver,
            cancel_token: cancel_token.clone(),
            model: VenueModel::from_record(record),
            projector: Projector::new(),
            router,
            store,
            connections: BTreeMap::new(),
            controller,
            info_tx,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Venue, venue_id.to_string()),
            empty_since: Some(Instant::now()),
            unloaded: false,
            router_closed: false,
        };
        // Prime every snapshot before the first session arrives.
        actor.publish();

        let task_handle = tokio::spawn(actor.run());

        let handle = VenueHandle {
            venue_id,
            instance,
            sender,
            cancel_token,
            info: info_rx,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "venue.actor.venue", fields(venue_id = %self.venue_id, instance = self.instance))]
    async fn run(mut self) {
        info!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            instance = self.instance,
            router_id = %self.router.id(),
            cameras = self.model.cameras.len(),
            "VenueActor started"
        );

        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "venue.actor.venue",
                        venue_id = %self.venue_id,
                        "VenueActor received cancellation signal"
                    );
                    break;
                }

                _ = housekeeping.tick() => {
                    if self.empty_since.is_some_and(|since| since.elapsed() >= EMPTY_VENUE_GRACE) {
                        self.unload().await;
                        break;
                    }
                    self.refresh_schedule();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if self.unloaded {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // Sessions still inside lose the venue without asking to leave.
        for connection in self.connections.values() {
            connection.event(events::VENUE_LEFT, json!({ "venueId": self.venue_id }));
        }

        // Cancellation skips the handshake but the router still goes.
        self.close_router().await;

        info!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            instance = self.instance,
            members_remaining = self.model.members.len(),
            messages_processed = self.mailbox.messages_processed(),
            "VenueActor stopped"
        );
    }

    async fn handle_message(&mut self, message: VenueMessage) {
        match message {
            VenueMessage::AddSession {
                member,
                connection,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_add_session(member, connection));
            }
            VenueMessage::RemoveSession {
                connection_id,
                respond_to,
            } => {
                self.handle_remove_session(connection_id).await;
                let _ = respond_to.send(());
                if self.model.is_empty() {
                    self.unload().await;
                }
            }
            VenueMessage::CheckAccess {
                requester,
                respond_to,
            } => {
                let _ = respond_to.send(self.check_access(requester));
            }
            VenueMessage::SetDisplayName {
                connection_id,
                username,
                respond_to,
            } => {
                let result = self
                    .model
                    .members
                    .write(&mut self.model.dirty)
                    .require_mut(connection_id)
                    .map(|m| m.username = username);
                self.publish();
                let _ = respond_to.send(result);
            }
            VenueMessage::GetPlacement {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.placement(connection_id));
            }
            VenueMessage::GetPublicState { respond_to } => {
                let _ = respond_to.send(
                    self.projector
                        .public()
                        .cloned()
                        .ok_or_else(|| not_computed("public")),
                );
            }
            VenueMessage::GetAdminState { respond_to } => {
                let _ = respond_to.send(
                    self.projector
                        .admin()
                        .cloned()
                        .ok_or_else(|| not_computed("admin")),
                );
            }
            VenueMessage::Resend {
                connection_id,
                slot,
                respond_to,
            } => {
                let _ = respond_to.send(self.resend(connection_id, slot));
            }
            VenueMessage::Update { update, respond_to } => {
                let _ = respond_to.send(self.handle_update(update).await);
            }
            VenueMessage::CreateCamera {
                name,
                sender_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_create_camera(name, sender_id).await);
            }
            VenueMessage::UpdateCamera {
                camera_id,
                update,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_update_camera(camera_id, update).await);
            }
            VenueMessage::DeleteCamera {
                camera_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_delete_camera(camera_id).await);
            }
            VenueMessage::UpsertPortal {
                from,
                to,
                portal,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_upsert_portal(from, to, portal).await);
            }
            VenueMessage::DeletePortal {
                from,
                to,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_delete_portal(from, to).await);
            }
            VenueMessage::SetSenderForCamera {
                sender_id,
                camera_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_set_sender(sender_id, camera_id).await);
            }
            VenueMessage::SetMainAudioCamera {
                camera_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_set_main_audio(camera_id));
            }
            VenueMessage::JoinCamera {
                connection_id,
                camera_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_join_camera(connection_id, camera_id).await);
            }
            VenueMessage::LeaveCamera {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_leave_camera(connection_id).await);
            }
            VenueMessage::GetCameraState {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.camera_state_of(connection_id));
            }
            VenueMessage::EnterSubSpace {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_subspace(connection_id, true));
            }
            VenueMessage::LeaveSubSpace {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_subspace(connection_id, false));
            }
            VenueMessage::GetRouterCapabilities { respond_to } => {
                let _ = respond_to.send(Ok(self.router.rtp_capabilities()));
            }
            VenueMessage::SetRtpCapabilities {
                connection_id,
                rtp_capabilities,
                respond_to,
            } => {
                let result = self
                    .model
                    .members
                    .write(&mut self.model.dirty)
                    .require_mut(connection_id)
                    .map(|m| m.media.rtp_capabilities = Some(rtp_capabilities));
                let _ = respond_to.send(result);
            }
            VenueMessage::CreateTransport {
                connection_id,
                direction,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_create_transport(connection_id, direction).await);
            }
            VenueMessage::ConnectTransport {
                connection_id,
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .handle_connect_transport(connection_id, &transport_id, dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }
            VenueMessage::CreateProducer {
                connection_id,
                transport_id,
                kind,
                rtp_parameters,
                respond_to,
            } => {
                let result = self
                    .handle_create_producer(connection_id, transport_id, kind, rtp_parameters)
                    .await;
                let _ = respond_to.send(result);
            }
            VenueMessage::CreateConsumer {
                connection_id,
                transport_id,
                producer_id,
                respond_to,
            } => {
                let result = self
                    .handle_create_consumer(connection_id, transport_id, producer_id)
                    .await;
                let _ = respond_to.send(result);
            }
            VenueMessage::CloseProducer {
                connection_id,
                producer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_close_producer(connection_id, producer_id).await);
            }
            VenueMessage::CloseConsumer {
                connection_id,
                consumer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_close_consumer(connection_id, consumer_id).await);
            }
            VenueMessage::GetStats { respond_to } => {
                let _ = respond_to.send(Ok(self.stats()));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    fn check_access(&self, requester: Requester) -> Result<(), VenueError> {
        if self
            .model
            .info
            .admits(requester.user_id, requester.role, Utc::now())
        {
            Ok(())
        } else {
            Err(VenueError::Authorization(
                "The venue is not open".to_string(),
            ))
        }
    }

    #[instrument(skip_all, fields(venue_id = %self.venue_id, connection_id = %member.connection_id))]
    fn handle_add_session(
        &mut self,
        member: Member,
        connection: ConnectionHandle,
    ) -> Result<JoinedVenue, VenueError> {
        self.check_access(Requester {
            user_id: member.user_id,
            role: member.role,
        })?;
        if self.model.members.contains(member.connection_id) {
            return Err(VenueError::Conflict(
                "Session has already joined this venue".to_string(),
            ));
        }

        let mut camera_id = None;
        if let Some(sender_id) = member.kind.sender_id() {
            if self.model.members.publisher_with_sender(sender_id).is_some() {
                return Err(VenueError::Conflict(
                    "A sender with that id is already connected".to_string(),
                ));
            }
            camera_id = self.model.cameras.find_by_configured_sender(sender_id);
        }

        let connection_id = member.connection_id;
        let username = member.username.clone();
        self.connections.insert(connection_id, connection);
        self.model
            .members
            .write(&mut self.model.dirty)
            .insert(member);

        if let Some(camera_id) = camera_id {
            let swap = self
                .model
                .cameras
                .write(&mut self.model.dirty)
                .attach_sender(camera_id, connection_id)?;
            if let Some(displaced) = swap.displaced {
                info!(
                    target: "venue.actor.venue",
                    venue_id = %self.venue_id,
                    camera_id = %camera_id,
                    displaced = %displaced,
                    "Configured sender displaced attached publisher"
                );
            }
        }

        self.empty_since = None;
        self.publish();

        info!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            connection_id = %connection_id,
            username = %username,
            members = self.model.members.len(),
            "Session joined venue"
        );

        Ok(JoinedVenue {
            venue_id: self.venue_id,
            camera_id,
        })
    }

    async fn handle_remove_session(&mut self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
        let Some(member) = self
            .model
            .members
            .write(&mut self.model.dirty)
            .remove(connection_id)
        else {
            debug!(
                target: "venue.actor.venue",
                venue_id = %self.venue_id,
                connection_id = %connection_id,
                "Remove for unknown session ignored"
            );
            return;
        };

        {
            let cameras = self.model.cameras.write(&mut self.model.dirty);
            cameras.leave_receiver(connection_id);
            cameras.detach_sender(connection_id);
        }

        // Closing a transport closes everything produced or consumed on it.
        for transport_id in member.media.transports.keys() {
            if let Err(e) = self.router.close_transport(transport_id).await {
                warn!(
                    target: "venue.actor.venue",
                    venue_id = %self.venue_id,
                    transport_id = %transport_id,
                    error = %e,
                    "Failed to close transport of departing session"
                );
            }
        }
        for producer_id in member.media.producers.keys() {
            let released = self.release_consumers(|_, entry| &entry.producer_id == producer_id);
            self.notify_consumers_closed(&released);
        }

        if self.model.is_empty() {
            self.empty_since = Some(Instant::now());
        }
        self.publish();

        info!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            connection_id = %connection_id,
            members = self.model.members.len(),
            "Session left venue"
        );
    }

    fn placement(&self, connection_id: ConnectionId) -> Result<SessionPlacement, VenueError> {
        let member = self.model.members.require(connection_id)?;
        let camera_id = if member.is_publisher() {
            self.model.cameras.camera_of_sender(connection_id)
        } else {
            self.model.cameras.camera_of_receiver(connection_id)
        };
        Ok(SessionPlacement {
            camera_id,
            in_sub_space: self.model.members.subspace().contains(&connection_id),
        })
    }

    fn resend(&self, connection_id: ConnectionId, slot: Slot) -> Result<(), VenueError> {
        self.model.members.require(connection_id)?;
        let Some(connection) = self.connections.get(&connection_id) else {
            return Ok(());
        };
        let payload = match slot {
            Slot::VenueState => self.projector.public().and_then(to_payload),
            Slot::AdminState => self.projector.admin().and_then(to_payload),
            Slot::CameraState => self
                .model
                .cameras
                .camera_of_receiver(connection_id)
                .and_then(|camera_id| self.projector.camera(camera_id))
                .and_then(to_payload),
            Slot::SubSpaceState => self.projector.subspace().and_then(to_payload),
        };
        if let Some(payload) = payload {
            connection.push(slot, payload);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Settings and graph
    // ------------------------------------------------------------------------

    async fn handle_update(&mut self, update: VenueUpdate) -> Result<VenueSettings, VenueError> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(VenueError::InvalidInput(
                    "Venue name must not be empty".to_string(),
                ));
            }
        }
        if let Some(Some(main_camera_id)) = update.main_camera_id {
            self.model.cameras.require(main_camera_id)?;
        }

        let settings = self.store.update_venue(self.venue_id, &update).await?;
        self.model.info.write(&mut self.model.dirty).settings = settings.clone();
        self.publish();
        Ok(settings)
    }

    async fn handle_create_camera(
        &mut self,
        name: String,
        sender_id: Option<SenderId>,
    ) -> Result<CameraRecord, VenueError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(VenueError::InvalidInput(
                "Camera name must not be empty".to_string(),
            ));
        }
        if let Some(sender_id) = &sender_id {
            self.ensure_sender_unclaimed(sender_id, None)?;
        }

        let record = self
            .store
            .create_camera(self.venue_id, &name, sender_id.as_ref())
            .await?;
        self.model
            .cameras
            .write(&mut self.model.dirty)
            .insert(Camera::from_record(&record));
        self.attach_configured_publisher(record.id);
        self.publish();

        info!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            camera_id = %record.id,
            "Camera created"
        );
        Ok(record)
    }

    async fn handle_update_camera(
        &mut self,
        camera_id: CameraId,
        update: CameraUpdate,
    ) -> Result<CameraRecord, VenueError> {
        self.model.cameras.require(camera_id)?;
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(VenueError::InvalidInput(
                    "Camera name must not be empty".to_string(),
                ));
            }
        }
        if let Some(Some(sender_id)) = &update.sender_id {
            self.ensure_sender_unclaimed(sender_id, Some(camera_id))?;
        }

        let record = self.store.update_camera(camera_id, &update).await?;

        // A publisher stays attached only while it matches the configured sender.
        let attached_mismatch = self
            .model
            .cameras
            .get(camera_id)
            .and_then(|c| c.sender)
            .filter(|conn| {
                self.model
                    .members
                    .get(*conn)
                    .and_then(|m| m.kind.sender_id())
                    != record.sender_id.as_ref()
            });

        {
            let cameras = self.model.cameras.write(&mut self.model.dirty);
            cameras.reload(&record);
            if let Some(conn) = attached_mismatch {
                cameras.detach_sender(conn);
            }
        }
        self.attach_configured_publisher(camera_id);
        self.publish();
        Ok(record)
    }

    /// Reject a sender id already configured on another camera.
    fn ensure_sender_unclaimed(
        &self,
        sender_id: &SenderId,
        except: Option<CameraId>,
    ) -> Result<(), VenueError> {
        match self.model.cameras.find_by_configured_sender(sender_id) {
            Some(other) if Some(other) != except => Err(VenueError::Conflict(
                "Another camera is already configured for that sender".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Attach the connected publisher matching the camera's configured
    /// sender, if the camera is free and the publisher is detached.
    fn attach_configured_publisher(&mut self, camera_id: CameraId) {
        let Some(camera) = self.model.cameras.get(camera_id) else {
            return;
        };
        if camera.sender.is_some() {
            return;
        }
        let Some(sender_id) = camera.configured_sender.as_ref() else {
            return;
        };
        let Some(conn) = self.model.members.publisher_with_sender(sender_id) else {
            return;
        };
        if self.model.cameras.camera_of_sender(conn).is_some() {
            return;
        }
        if let Err(e) = self
            .model
            .cameras
            .write(&mut self.model.dirty)
            .attach_sender(camera_id, conn)
        {
            warn!(
                target: "venue.actor.venue",
                venue_id = %self.venue_id,
                camera_id = %camera_id,
                error = %e,
                "Failed to attach configured publisher"
            );
        }
    }

    #[instrument(skip_all, fields(venue_id = %self.venue_id, camera_id = %camera_id))]
    async fn handle_delete_camera(&mut self, camera_id: CameraId) -> Result<(), VenueError> {
        let receivers: Vec<ConnectionId> = self
            .model
            .cameras
            .require(camera_id)?
            .receivers
            .iter()
            .copied()
            .collect();

        // Receivers lose their consumers before the camera goes away. A
        // consumer closed on the router leaves member state at once, even if
        // a later step fails.
        let open_consumers: Vec<(ConnectionId, ConsumerId)> = self
            .model
            .members
            .iter()
            .flat_map(|m| {
                m.media
                    .consumers_on(camera_id)
                    .into_iter()
                    .map(move |id| (m.connection_id, id))
            })
            .collect();
        let mut released = Vec::new();
        let mut closed = Ok(());
        for (connection_id, consumer_id) in open_consumers {
            if let Err(e) = self.router.close_consumer(&consumer_id).await {
                closed = Err(e);
                break;
            }
            released.extend(self.release_consumer(connection_id, consumer_id));
        }
        self.notify_consumers_closed(&released);

        let deleted = match closed {
            Ok(()) => self.store.delete_camera(camera_id).await,
            Err(e) => Err(e),
        };
        let mut referencing: BTreeSet<CameraId> = match deleted {
            Ok(referencing) => referencing.into_iter().collect(),
            Err(e) => {
                self.publish();
                return Err(e);
            }
        };
        referencing.extend(self.model.cameras.cameras_with_edge_to(camera_id));
        referencing.remove(&camera_id);

        self.model
            .cameras
            .write(&mut self.model.dirty)
            .remove(camera_id);
        for receiver in &receivers {
            if let Some(connection) = self.connections.get(receiver) {
                connection.event(events::CAMERA_LEFT, json!({ "cameraId": camera_id }));
            }
        }

        // Sources of edges into the deleted camera are re-read from the store.
        let mut reloaded = Vec::new();
        for source in referencing {
            match self.store.get_camera(source).await {
                Ok(record) => reloaded.push(Ok(record)),
                Err(e) => {
                    warn!(
                        target: "venue.actor.venue",
                        venue_id = %self.venue_id,
                        camera_id = %source,
                        error = %e,
                        "Failed to reload camera, dropping stale portal in memory"
                    );
                    reloaded.push(Err(source));
                }
            }
        }
        {
            let cameras = self.model.cameras.write(&mut self.model.dirty);
            for outcome in reloaded {
                match outcome {
                    Ok(record) => cameras.reload(&record),
                    Err(source) => {
                        if let Ok(camera) = cameras.get_mut(source) {
                            camera.portals.remove(&camera_id);
                        }
                    }
                }
            }
        }

        if self.model.info.settings.main_camera_id == Some(camera_id) {
            self.model
                .info
                .write(&mut self.model.dirty)
                .settings
                .main_camera_id = None;
        }
        if *self.model.main_audio_camera == Some(camera_id) {
            self.model
                .main_audio_camera
                .set(&mut self.model.dirty, None);
        }

        self.publish();

        info!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            camera_id = %camera_id,
            receivers_moved = receivers.len(),
            consumers_closed = released.len(),
            "Camera deleted"
        );
        Ok(())
    }

    async fn handle_upsert_portal(
        &mut self,
        from: CameraId,
        to: CameraId,
        portal: Portal,
    ) -> Result<(), VenueError> {
        if from == to {
            return Err(VenueError::InvalidInput(
                "A portal cannot lead to its own camera".to_string(),
            ));
        }
        self.model.cameras.require(from)?;
        self.model.cameras.require(to)?;

        self.store.upsert_portal(from, to, &portal).await?;
        self.model
            .cameras
            .write(&mut self.model.dirty)
            .upsert_portal(from, to, portal)?;
        self.publish();
        Ok(())
    }

    async fn handle_delete_portal(&mut self, from: CameraId, to: CameraId) -> Result<(), VenueError> {
        if !self.model.cameras.require(from)?.portals.contains_key(&to) {
            return Err(VenueError::PortalNotFound(format!("{from} -> {to}")));
        }

        self.store.delete_portal(from, to).await?;
        self.model
            .cameras
            .write(&mut self.model.dirty)
            .remove_portal(from, to)?;
        self.publish();
        Ok(())
    }

    #[instrument(skip_all, fields(venue_id = %self.venue_id, camera_id = %camera_id))]
    async fn handle_set_sender(
        &mut self,
        sender_id: SenderId,
        camera_id: CameraId,
    ) -> Result<(), VenueError> {
        self.model.cameras.require(camera_id)?;
        let conn = self
            .model
            .members
            .publisher_with_sender(&sender_id)
            .ok_or_else(|| VenueError::SessionNotFound(sender_id.to_string()))?;

        // The sender id moves: other cameras configured for it are cleared.
        let others: Vec<CameraId> = self
            .model
            .cameras
            .iter()
            .filter(|c| c.id != camera_id && c.configured_sender.as_ref() == Some(&sender_id))
            .map(|c| c.id)
            .collect();
        let clear = CameraUpdate {
            name: None,
            sender_id: Some(None),
        };
        let mut records = Vec::with_capacity(others.len() + 1);
        for other in others {
            records.push(self.store.update_camera(other, &clear).await?);
        }
        let assign = CameraUpdate {
            name: None,
            sender_id: Some(Some(sender_id.clone())),
        };
        records.push(self.store.update_camera(camera_id, &assign).await?);

        let swap = {
            let cameras = self.model.cameras.write(&mut self.model.dirty);
            for record in &records {
                cameras.reload(record);
            }
            cameras.attach_sender(camera_id, conn)?
        };
        self.publish();

        info!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            camera_id = %camera_id,
            sender_id = %sender_id,
            left_camera = ?swap.left_camera,
            displaced = ?swap.displaced,
            "Sender attached to camera"
        );
        Ok(())
    }

    fn handle_set_main_audio(&mut self, camera_id: Option<CameraId>) -> Result<(), VenueError> {
        if let Some(camera_id) = camera_id {
            self.model.cameras.require(camera_id)?;
        }
        self.model
            .main_audio_camera
            .set(&mut self.model.dirty, camera_id);
        self.publish();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Cameras and sub-space
    // ------------------------------------------------------------------------

    async fn handle_join_camera(
        &mut self,
        connection_id: ConnectionId,
        camera_id: CameraId,
    ) -> Result<CameraState, VenueError> {
        if self.model.members.require(connection_id)?.is_publisher() {
            return Err(VenueError::Precondition(
                "Publisher sessions cannot join cameras".to_string(),
            ));
        }
        self.model.cameras.require(camera_id)?;

        if let Some(previous) = self.model.cameras.camera_of_receiver(connection_id) {
            if previous != camera_id {
                self.close_consumers_on(connection_id, previous).await;
            }
        }
        self.model
            .cameras
            .write(&mut self.model.dirty)
            .join_receiver(camera_id, connection_id)?;
        let changes = self.publish();

        let state = self
            .projector
            .camera(camera_id)
            .cloned()
            .ok_or_else(|| not_computed("camera"))?;
        if !changes.cameras.contains(&camera_id) {
            if let (Some(connection), Some(payload)) =
                (self.connections.get(&connection_id), to_payload(&state))
            {
                connection.push(Slot::CameraState, payload);
            }
        }
        Ok(state)
    }

    async fn handle_leave_camera(&mut self, connection_id: ConnectionId) -> Result<(), VenueError> {
        self.model.members.require(connection_id)?;
        let camera_id = self
            .model
            .cameras
            .camera_of_receiver(connection_id)
            .ok_or_else(|| VenueError::Precondition("Not in a camera".to_string()))?;

        self.close_consumers_on(connection_id, camera_id).await;
        self.model
            .cameras
            .write(&mut self.model.dirty)
            .leave_receiver(connection_id);
        self.publish();
        Ok(())
    }

    fn camera_state_of(&self, connection_id: ConnectionId) -> Result<CameraState, VenueError> {
        self.model.members.require(connection_id)?;
        let camera_id = self
            .model
            .cameras
            .camera_of_receiver(connection_id)
            .ok_or_else(|| VenueError::Precondition("Not in a camera".to_string()))?;
        self.projector
            .camera(camera_id)
            .cloned()
            .ok_or_else(|| not_computed("camera"))
    }

    fn handle_subspace(&mut self, connection_id: ConnectionId, enter: bool) -> Result<(), VenueError> {
        self.model.members.require(connection_id)?;
        let members = self.model.members.write(&mut self.model.dirty);
        let changed = if enter {
            members.enter_subspace(connection_id)
        } else {
            members.leave_subspace(connection_id)
        };
        if !changed {
            debug!(
                target: "venue.actor.venue",
                venue_id = %self.venue_id,
                connection_id = %connection_id,
                enter,
                "Sub-space membership unchanged"
            );
        }
        self.publish();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Media negotiation
    // ------------------------------------------------------------------------

    async fn handle_create_transport(
        &mut self,
        connection_id: ConnectionId,
        direction: TransportDirection,
    ) -> Result<TransportInfo, VenueError> {
        self.model.members.require(connection_id)?;
        let transport = self.router.create_transport(direction).await?;
        self.model
            .members
            .write(&mut self.model.dirty)
            .require_mut(connection_id)?
            .media
            .transports
            .insert(transport.id.clone(), direction);
        Ok(transport)
    }

    async fn handle_connect_transport(
        &mut self,
        connection_id: ConnectionId,
        transport_id: &TransportId,
        dtls_parameters: Value,
    ) -> Result<(), VenueError> {
        let member = self.model.members.require(connection_id)?;
        if !member.media.transports.contains_key(transport_id) {
            return Err(VenueError::Precondition("Unknown transport".to_string()));
        }
        self.router
            .connect_transport(transport_id, dtls_parameters)
            .await
    }

    async fn handle_create_producer(
        &mut self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerId, VenueError> {
        let member = self.model.members.require(connection_id)?;
        if member.media.transports.get(&transport_id) != Some(&TransportDirection::Send) {
            return Err(VenueError::Precondition(
                "Unknown send transport".to_string(),
            ));
        }

        let producer_id = self
            .router
            .produce(&transport_id, kind, rtp_parameters)
            .await?;
        self.model
            .members
            .write(&mut self.model.dirty)
            .require_mut(connection_id)?
            .media
            .producers
            .insert(producer_id.clone(), kind);
        self.publish();

        debug!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            connection_id = %connection_id,
            producer_id = %producer_id,
            "Producer created"
        );
        Ok(producer_id)
    }

    async fn handle_create_consumer(
        &mut self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        producer_id: ProducerId,
    ) -> Result<ConsumerInfo, VenueError> {
        let member = self.model.members.require(connection_id)?;
        let rtp_capabilities = member.media.rtp_capabilities.clone().ok_or_else(|| {
            VenueError::Precondition("RTP capabilities have not been set".to_string())
        })?;
        if member.media.transports.get(&transport_id) != Some(&TransportDirection::Receive) {
            return Err(VenueError::Precondition(
                "Unknown receive transport".to_string(),
            ));
        }
        let camera_id = self
            .model
            .cameras
            .camera_of_receiver(connection_id)
            .ok_or_else(|| VenueError::Precondition("Not in a camera".to_string()))?;

        // Consumable: producers in the receiver's camera plus the main audio.
        let source_camera = self
            .model
            .members
            .iter()
            .find(|m| m.media.producers.contains_key(&producer_id))
            .and_then(|m| self.model.cameras.camera_of_sender(m.connection_id));
        let is_main_audio = self.projector.main_audio_producer().as_ref() == Some(&producer_id);
        let entry_camera = match source_camera {
            Some(source) if source == camera_id || is_main_audio => source,
            _ => {
                return Err(VenueError::Precondition(
                    "Producer is not available in this camera".to_string(),
                ))
            }
        };

        let consumer = self
            .router
            .consume(&transport_id, &producer_id, &rtp_capabilities)
            .await?;
        self.model
            .members
            .write(&mut self.model.dirty)
            .require_mut(connection_id)?
            .media
            .consumers
            .insert(
                consumer.id.clone(),
                ConsumerEntry {
                    producer_id,
                    camera_id: entry_camera,
                },
            );
        Ok(consumer)
    }

    async fn handle_close_producer(
        &mut self,
        connection_id: ConnectionId,
        producer_id: ProducerId,
    ) -> Result<(), VenueError> {
        let member = self.model.members.require(connection_id)?;
        if !member.media.producers.contains_key(&producer_id) {
            return Err(VenueError::Precondition("Unknown producer".to_string()));
        }

        self.router.close_producer(&producer_id).await?;
        self.model
            .members
            .write(&mut self.model.dirty)
            .require_mut(connection_id)?
            .media
            .producers
            .remove(&producer_id);
        let released = self.release_consumers(|_, entry| entry.producer_id == producer_id);
        self.notify_consumers_closed(&released);
        self.publish();
        Ok(())
    }

    async fn handle_close_consumer(
        &mut self,
        connection_id: ConnectionId,
        consumer_id: ConsumerId,
    ) -> Result<(), VenueError> {
        let member = self.model.members.require(connection_id)?;
        if !member.media.consumers.contains_key(&consumer_id) {
            return Err(VenueError::Precondition("Unknown consumer".to_string()));
        }

        self.router.close_consumer(&consumer_id).await?;
        self.model
            .members
            .write(&mut self.model.dirty)
            .require_mut(connection_id)?
            .media
            .consumers
            .remove(&consumer_id);
        Ok(())
    }

    /// Close one receiver's consumers on `camera_id`. Collaborator errors are
    /// logged; the entries are dropped regardless.
    async fn close_consumers_on(&mut self, connection_id: ConnectionId, camera_id: CameraId) {
        let consumer_ids = self
            .model
            .members
            .get(connection_id)
            .map(|m| m.media.consumers_on(camera_id))
            .unwrap_or_default();
        if consumer_ids.is_empty() {
            return;
        }
        for consumer_id in &consumer_ids {
            if let Err(e) = self.router.close_consumer(consumer_id).await {
                warn!(
                    target: "venue.actor.venue",
                    venue_id = %self.venue_id,
                    consumer_id = %consumer_id,
                    error = %e,
                    "Failed to close consumer"
                );
            }
        }
        let released = self.release_consumers(|owner, entry| {
            owner == connection_id && entry.camera_id == camera_id
        });
        self.notify_consumers_closed(&released);
    }

    /// Drop matching consumer entries from every member.
    fn release_consumers(
        &mut self,
        matches: impl Fn(ConnectionId, &ConsumerEntry) -> bool,
    ) -> Vec<ReleasedConsumer> {
        let mut released = Vec::new();
        for member in self.model.members.write(&mut self.model.dirty).iter_mut() {
            let ids: Vec<ConsumerId> = member
                .media
                .consumers
                .iter()
                .filter(|(_, entry)| matches(member.connection_id, entry))
                .map(|(id, _)| id.clone())
                .collect();
            for consumer_id in ids {
                if let Some(entry) = member.media.consumers.remove(&consumer_id) {
                    released.push(ReleasedConsumer {
                        connection_id: member.connection_id,
                        consumer_id,
                        entry,
                    });
                }
            }
        }
        released
    }

    fn release_consumer(
        &mut self,
        connection_id: ConnectionId,
        consumer_id: ConsumerId,
    ) -> Option<ReleasedConsumer> {
        let member = self
            .model
            .members
            .write(&mut self.model.dirty)
            .require_mut(connection_id)
            .ok()?;
        let entry = member.media.consumers.remove(&consumer_id)?;
        Some(ReleasedConsumer {
            connection_id,
            consumer_id,
            entry,
        })
    }

    fn notify_consumers_closed(&self, released: &[ReleasedConsumer]) {
        for r in released {
            if let Some(connection) = self.connections.get(&r.connection_id) {
                connection.event(
                    events::CONSUMER_CLOSED,
                    json!({
                        "consumerId": r.consumer_id,
                        "producerId": r.entry.producer_id,
                    }),
                );
            }
        }
    }

    fn stats(&self) -> VenueStats {
        let members = &self.model.members;
        VenueStats {
            venue_id: self.venue_id,
            name: self.model.info.settings.name.clone(),
            router_id: self.router.id().to_string(),
            cameras: self.model.cameras.len(),
            receivers: members.receiver_count(),
            publishers: members.publisher_count(),
            transports: members.iter().map(|m| m.media.transports.len()).sum(),
            producers: members.iter().map(|m| m.media.producers.len()).sum(),
            consumers: members.iter().map(|m| m.media.consumers.len()).sum(),
        }
    }

    // ------------------------------------------------------------------------
    // Projection
    // ------------------------------------------------------------------------

    /// Recompute snapshots invalidated since the last flush and push the
    /// ones that changed.
    fn publish(&mut self) -> ProjectionChanges {
        let dirty = self.model.take_dirty();
        if dirty.contains(Field::Info) {
            self.info_tx.send_replace((*self.model.info).clone());
        }
        let changes = self.projector.flush(&self.model, dirty, Utc::now());
        if changes.is_empty() {
            return changes;
        }

        if changes.public {
            if let Some(payload) = self.projector.public().and_then(to_payload) {
                for connection in self.connections.values() {
                    connection.push(Slot::VenueState, payload.clone());
                }
            }
        }

        if changes.admin {
            if let Some(payload) = self.projector.admin().and_then(to_payload) {
                for member in self.model.members.iter() {
                    if !member.role.at_least(Role::Moderator) {
                        continue;
                    }
                    if let Some(connection) = self.connections.get(&member.connection_id) {
                        connection.push(Slot::AdminState, payload.clone());
                    }
                }
            }
        }

        for camera_id in &changes.cameras {
            let (Some(camera), Some(payload)) = (
                self.model.cameras.get(*camera_id),
                self.projector.camera(*camera_id).and_then(to_payload),
            ) else {
                continue;
            };
            for receiver in &camera.receivers {
                if let Some(connection) = self.connections.get(receiver) {
                    connection.push(Slot::CameraState, payload.clone());
                }
            }
        }

        if changes.subspace {
            if let Some(payload) = self.projector.subspace().and_then(to_payload) {
                for occupant in self.model.members.subspace() {
                    if let Some(connection) = self.connections.get(occupant) {
                        connection.push(Slot::SubSpaceState, payload.clone());
                    }
                }
            }
        }

        changes
    }

    /// Door and stream state follow the clock. Republish when either has
    /// flipped since the last flush.
    fn refresh_schedule(&mut self) {
        let now = Utc::now();
        let settings = &self.model.info.settings;
        let stale = self.projector.public().is_some_and(|public| {
            public.doors_are_open != settings.doors_are_open(now)
                || public.stream_is_active != settings.stream_is_active(now)
        });
        if stale {
            debug!(
                target: "venue.actor.venue",
                venue_id = %self.venue_id,
                "Scheduled door or stream time passed"
            );
            self.model.dirty.mark(Field::Info);
            self.publish();
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn unload(&mut self) {
        if self.unloaded {
            return;
        }
        self.unloaded = true;

        info!(
            target: "venue.actor.venue",
            venue_id = %self.venue_id,
            instance = self.instance,
            "Venue empty, unloading"
        );

        let _ = self
            .controller
            .send(ControllerMessage::VenueUnloading {
                venue_id: self.venue_id,
                instance: self.instance,
            })
            .await;
        self.close_router().await;
        let _ = self
            .controller
            .send(ControllerMessage::VenueUnloaded {
                venue_id: self.venue_id,
                instance: self.instance,
            })
            .await;

        // Queued requests are answered with VenueNotFound when dropped.
        self.receiver.close();
    }

    async fn close_router(&mut self) {
        if self.router_closed {
            return;
        }
        self.router_closed = true;
        if let Err(e) = self.router.close().await {
            error!(
                target: "venue.actor.venue",
                venue_id = %self.venue_id,
                router_id = %self.router.id(),
                error = %e,
                "Failed to close router"
            );
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(
                target: "venue.actor.venue",
                error = %e,
                "Failed to serialize snapshot"
            );
            None
        }
    }
}

fn not_computed(which: &str) -> VenueError {
    VenueError::Internal(format!("{which} state has not been computed"))
}
