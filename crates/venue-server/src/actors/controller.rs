//! `VenueControllerActor` - singleton owner of the loaded-venue table.
//!
//! The controller:
//!
//! - Loads venues on demand; concurrent loads of one venue share a single
//!   store read and a single router
//! - Supervises the `VenueActor` instances it spawned
//! - Serializes venue deletion against loading
//! - Owns the root `CancellationToken` for graceful shutdown
//!
//! # Loading
//!
//! A load runs in two phases outside the mailbox: the store read, then router
//! creation. Both post their result back as a message, so the controller
//! never blocks on I/O. Requesters that arrive while a load is in flight
//! queue behind it. Requesters that arrive while a venue is unloading wait
//! until the old instance is gone, then get a fresh one.

use super::messages::{ControllerMessage, ControllerStatus, Reply, Requester};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::venue::{VenueActor, VenueHandle};
use crate::errors::VenueError;
use crate::media::{MediaRouter, MediaTransport};
use crate::store::{VenueRecord, VenueStore, VenueSummary};
use chrono::Utc;
use common::types::{Role, VenueId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Deadline used when shutdown comes from cancellation rather than a request.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Handle to the `VenueControllerActor`.
#[derive(Clone)]
pub struct VenueControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl VenueControllerHandle {
    /// Create a new `VenueControllerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        server_id: String,
        store: Arc<dyn VenueStore>,
        media: Arc<dyn MediaTransport>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = VenueControllerActor {
            mailbox: MailboxMonitor::new(ActorType::Controller, &server_id),
            server_id,
            receiver,
            loopback: sender.clone(),
            cancel_token: cancel_token.clone(),
            venues: HashMap::new(),
            deleting: HashSet::new(),
            next_instance: 1,
            accepting_new: true,
            store,
            media,
            metrics,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, VenueError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| VenueError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| VenueError::Internal(format!("response receive failed: {e}")))
    }

    /// Return the loaded instance of a venue, loading it if needed.
    ///
    /// Fails with `Authorization` if the requester is not admitted by the
    /// venue's access rule at load time.
    pub async fn load_venue(
        &self,
        venue_id: VenueId,
        requester: Requester,
    ) -> Result<VenueHandle, VenueError> {
        self.call(|respond_to| ControllerMessage::LoadVenue {
            venue_id,
            requester,
            respond_to,
        })
        .await?
    }

    /// Delete a venue that is not loaded. Owners and admins only.
    pub async fn delete_venue(
        &self,
        venue_id: VenueId,
        requester: Requester,
    ) -> Result<(), VenueError> {
        self.call(|respond_to| ControllerMessage::DeleteVenue {
            venue_id,
            requester,
            respond_to,
        })
        .await?
    }

    pub async fn list_loaded(&self) -> Result<Vec<VenueSummary>, VenueError> {
        self.call(|respond_to| ControllerMessage::ListLoaded { respond_to })
            .await
    }

    pub async fn loaded_handles(&self) -> Result<Vec<VenueHandle>, VenueError> {
        self.call(|respond_to| ControllerMessage::LoadedHandles { respond_to })
            .await
    }

    pub async fn status(&self) -> Result<ControllerStatus, VenueError> {
        self.call(|respond_to| ControllerMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting loads, stop every venue and wait for them up to
    /// `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), VenueError> {
        self.call(|respond_to| ControllerMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// A requester waiting for a venue handle.
struct Waiter {
    requester: Requester,
    respond_to: Reply<VenueHandle>,
}

impl Waiter {
    fn admitted_by(&self, record: &VenueRecord) -> bool {
        record
            .info()
            .admits(self.requester.user_id, self.requester.role, Utc::now())
    }

    fn reject(self, error: VenueError) {
        let _ = self.respond_to.send(Err(error));
    }
}

/// Lifecycle of one venue in the table.
enum VenueSlot {
    /// Store read or router creation in flight.
    Loading { waiters: Vec<Waiter> },
    Loaded {
        handle: VenueHandle,
        task_handle: JoinHandle<()>,
    },
    /// The actor is closing its router. New requesters wait here.
    Unloading { instance: u64, waiters: Vec<Waiter> },
}

/// The `VenueControllerActor` implementation.
pub struct VenueControllerActor {
    server_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Sender used by background load and delete tasks to report back.
    loopback: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    venues: HashMap<VenueId, VenueSlot>,
    /// Venues with a delete in flight; loads fail until it finishes.
    deleting: HashSet<VenueId>,
    next_instance: u64,
    accepting_new: bool,
    store: Arc<dyn VenueStore>,
    media: Arc<dyn MediaTransport>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl VenueControllerActor {
    #[instrument(skip_all, name = "venue.actor.controller", fields(server_id = %self.server_id))]
    async fn run(mut self) {
        info!(
            target: "venue.actor.controller",
            server_id = %self.server_id,
            "VenueControllerActor started"
        );

        loop {
            self.check_venue_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "venue.actor.controller",
                        server_id = %self.server_id,
                        "VenueControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown(DEFAULT_SHUTDOWN_DEADLINE).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(ControllerMessage::Shutdown { deadline, respond_to }) => {
                            self.graceful_shutdown(deadline).await;
                            let _ = respond_to.send(());
                            break;
                        }
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "venue.actor.controller",
                                server_id = %self.server_id,
                                "VenueControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "venue.actor.controller",
            server_id = %self.server_id,
            venues_remaining = self.venues.len(),
            messages_processed = self.mailbox.messages_processed(),
            "VenueControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::LoadVenue {
                venue_id,
                requester,
                respond_to,
            } => {
                self.handle_load(
                    venue_id,
                    Waiter {
                        requester,
                        respond_to,
                    },
                );
            }

            ControllerMessage::RecordFetched { venue_id, result } => {
                self.handle_record_fetched(venue_id, result);
            }

            ControllerMessage::RouterCreated {
                venue_id,
                record,
                result,
            } => {
                self.handle_router_created(venue_id, record, result).await;
            }

            ControllerMessage::VenueUnloading { venue_id, instance } => {
                self.handle_unloading(venue_id, instance);
            }

            ControllerMessage::VenueUnloaded { venue_id, instance } => {
                self.handle_unloaded(venue_id, instance);
            }

            ControllerMessage::DeleteVenue {
                venue_id,
                requester,
                respond_to,
            } => {
                self.handle_delete(venue_id, requester, respond_to);
            }

            ControllerMessage::DeleteFinished { venue_id } => {
                self.deleting.remove(&venue_id);
            }

            ControllerMessage::ListLoaded { respond_to } => {
                let _ = respond_to.send(self.list_loaded());
            }

            ControllerMessage::LoadedHandles { respond_to } => {
                let handles = self
                    .venues
                    .values()
                    .filter_map(|slot| match slot {
                        VenueSlot::Loaded { handle, .. } => Some(handle.clone()),
                        _ => None,
                    })
                    .collect();
                let _ = respond_to.send(handles);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            // Handled in the run loop.
            ControllerMessage::Shutdown { respond_to, .. } => {
                let _ = respond_to.send(());
            }
        }
    }

    fn handle_load(&mut self, venue_id: VenueId, waiter: Waiter) {
        if !self.accepting_new {
            waiter.reject(VenueError::Precondition(
                "Server is shutting down".to_string(),
            ));
            return;
        }
        if self.deleting.contains(&venue_id) {
            waiter.reject(VenueError::Precondition(
                "Venue is being deleted".to_string(),
            ));
            return;
        }

        match self.venues.get_mut(&venue_id) {
            Some(VenueSlot::Loaded { handle, .. }) => {
                // Admission is checked again when the session joins.
                let _ = waiter.respond_to.send(Ok(handle.clone()));
            }
            Some(VenueSlot::Loading { waiters } | VenueSlot::Unloading { waiters, .. }) => {
                debug!(
                    target: "venue.actor.controller",
                    venue_id = %venue_id,
                    queued = waiters.len() + 1,
                    "Load queued behind in-flight transition"
                );
                waiters.push(waiter);
            }
            None => {
                self.venues.insert(
                    venue_id,
                    VenueSlot::Loading {
                        waiters: vec![waiter],
                    },
                );
                self.start_fetch(venue_id);
            }
        }
    }

    /// Phase one: read the venue from the store off the mailbox.
    fn start_fetch(&self, venue_id: VenueId) {
        debug!(
            target: "venue.actor.controller",
            server_id = %self.server_id,
            venue_id = %venue_id,
            "Loading venue"
        );
        let store = Arc::clone(&self.store);
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            let result = store.get_venue(venue_id).await;
            let _ = loopback
                .send(ControllerMessage::RecordFetched { venue_id, result })
                .await;
        });
    }

    fn handle_record_fetched(&mut self, venue_id: VenueId, result: Result<VenueRecord, VenueError>) {
        let Some(VenueSlot::Loading { waiters }) = self.venues.get_mut(&venue_id) else {
            return;
        };
        let pending = std::mem::take(waiters);

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                self.venues.remove(&venue_id);
                warn!(
                    target: "venue.actor.controller",
                    venue_id = %venue_id,
                    error = %e,
                    "Venue load failed"
                );
                for waiter in pending {
                    waiter.reject(e.clone());
                }
                return;
            }
        };

        let admitted = reject_unadmitted(pending, &record);
        if admitted.is_empty() {
            self.venues.remove(&venue_id);
            return;
        }
        if let Some(VenueSlot::Loading { waiters }) = self.venues.get_mut(&venue_id) {
            *waiters = admitted;
        }

        // Phase two: ask the collaborator for a router.
        let media = Arc::clone(&self.media);
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            let result = media.create_router(venue_id).await;
            let _ = loopback
                .send(ControllerMessage::RouterCreated {
                    venue_id,
                    record,
                    result,
                })
                .await;
        });
    }

    async fn handle_router_created(
        &mut self,
        venue_id: VenueId,
        record: VenueRecord,
        result: Result<Arc<dyn MediaRouter>, VenueError>,
    ) {
        let Some(VenueSlot::Loading { waiters }) = self.venues.remove(&venue_id) else {
            return;
        };

        let router = match result {
            Ok(router) => router,
            Err(e) => {
                error!(
                    target: "venue.actor.controller",
                    venue_id = %venue_id,
                    error = %e,
                    "Router creation failed"
                );
                for waiter in waiters {
                    waiter.reject(e.clone());
                }
                return;
            }
        };

        // Requesters that queued during router creation have not been checked.
        let admitted = reject_unadmitted(waiters, &record);
        if admitted.is_empty() || !self.accepting_new {
            if let Err(e) = router.close().await {
                warn!(
                    target: "venue.actor.controller",
                    venue_id = %venue_id,
                    error = %e,
                    "Failed to close unused router"
                );
            }
            for waiter in admitted {
                waiter.reject(VenueError::Precondition(
                    "Server is shutting down".to_string(),
                ));
            }
            return;
        }

        let instance = self.next_instance;
        self.next_instance += 1;

        let (handle, task_handle) = VenueActor::spawn(
            &record,
            instance,
            router,
            Arc::clone(&self.store),
            self.loopback.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        for waiter in admitted {
            let _ = waiter.respond_to.send(Ok(handle.clone()));
        }

        self.venues.insert(
            venue_id,
            VenueSlot::Loaded {
                handle,
                task_handle,
            },
        );
        self.metrics.venue_loaded();

        info!(
            target: "venue.actor.controller",
            server_id = %self.server_id,
            venue_id = %venue_id,
            instance,
            loaded_venues = self.metrics.venue_count(),
            "Venue loaded"
        );
    }

    fn handle_unloading(&mut self, venue_id: VenueId, instance: u64) {
        let matches = matches!(
            self.venues.get(&venue_id),
            Some(VenueSlot::Loaded { handle, .. }) if handle.instance() == instance
        );
        if !matches {
            return;
        }
        let Some(VenueSlot::Loaded { task_handle, .. }) = self.venues.remove(&venue_id) else {
            return;
        };
        self.venues.insert(
            venue_id,
            VenueSlot::Unloading {
                instance,
                waiters: Vec::new(),
            },
        );

        // Don't block the mailbox on the actor's exit.
        tokio::spawn(async move {
            match tokio::time::timeout(Duration::from_secs(5), task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "venue.actor.controller",
                        venue_id = %venue_id,
                        "Venue actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "venue.actor.controller",
                        venue_id = %venue_id,
                        error = ?e,
                        "Venue actor task panicked during unload"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "venue.actor.controller",
                        venue_id = %venue_id,
                        "Venue actor task unload timed out"
                    );
                }
            }
        });
    }

    fn handle_unloaded(&mut self, venue_id: VenueId, instance: u64) {
        let matches = matches!(
            self.venues.get(&venue_id),
            Some(VenueSlot::Unloading { instance: current, .. }) if *current == instance
        );
        if !matches {
            return;
        }
        let Some(VenueSlot::Unloading { waiters, .. }) = self.venues.remove(&venue_id) else {
            return;
        };
        self.metrics.venue_unloaded();

        info!(
            target: "venue.actor.controller",
            server_id = %self.server_id,
            venue_id = %venue_id,
            instance,
            waiting = waiters.len(),
            "Venue unloaded"
        );

        if !waiters.is_empty() {
            self.venues
                .insert(venue_id, VenueSlot::Loading { waiters });
            self.start_fetch(venue_id);
        }
    }

    fn handle_delete(&mut self, venue_id: VenueId, requester: Requester, respond_to: Reply<()>) {
        if self.venues.contains_key(&venue_id) {
            let _ = respond_to.send(Err(VenueError::Precondition(
                "Venue is loaded; every session must leave before it can be deleted".to_string(),
            )));
            return;
        }
        if !self.deleting.insert(venue_id) {
            let _ = respond_to.send(Err(VenueError::Precondition(
                "Venue is already being deleted".to_string(),
            )));
            return;
        }

        let store = Arc::clone(&self.store);
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            let result = async {
                let record = store.get_venue(venue_id).await?;
                if !record.owners.contains(&requester.user_id)
                    && !requester.role.at_least(Role::Admin)
                {
                    return Err(VenueError::Authorization(
                        "Only owners can delete a venue".to_string(),
                    ));
                }
                store.delete_venue(venue_id).await
            }
            .await;

            if result.is_ok() {
                info!(
                    target: "venue.actor.controller",
                    venue_id = %venue_id,
                    "Venue deleted"
                );
            }
            let _ = respond_to.send(result);
            let _ = loopback
                .send(ControllerMessage::DeleteFinished { venue_id })
                .await;
        });
    }

    fn list_loaded(&self) -> Vec<VenueSummary> {
        let mut loaded: Vec<VenueSummary> = self
            .venues
            .values()
            .filter_map(|slot| match slot {
                VenueSlot::Loaded { handle, .. } => {
                    let info = handle.info();
                    Some(VenueSummary {
                        venue_id: handle.venue_id(),
                        name: info.settings.name,
                        visibility: info.settings.visibility,
                    })
                }
                _ => None,
            })
            .collect();
        loaded.sort_by(|a, b| a.name.cmp(&b.name));
        loaded
    }

    fn get_status(&self) -> ControllerStatus {
        let mut status = ControllerStatus {
            loaded: 0,
            loading: 0,
            unloading: 0,
            connections: self.metrics.connection_count(),
            mailbox_depth: self.mailbox.current_depth(),
        };
        for slot in self.venues.values() {
            match slot {
                VenueSlot::Loading { .. } => status.loading += 1,
                VenueSlot::Loaded { .. } => status.loaded += 1,
                VenueSlot::Unloading { .. } => status.unloading += 1,
            }
        }
        status
    }

    async fn graceful_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "venue.actor.controller",
            server_id = %self.server_id,
            venue_count = self.venues.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        let mut tasks = Vec::new();
        for (venue_id, slot) in self.venues.drain() {
            match slot {
                VenueSlot::Loading { waiters } | VenueSlot::Unloading { waiters, .. } => {
                    for waiter in waiters {
                        waiter.reject(VenueError::Precondition(
                            "Server is shutting down".to_string(),
                        ));
                    }
                }
                VenueSlot::Loaded {
                    handle,
                    task_handle,
                } => {
                    debug!(
                        target: "venue.actor.controller",
                        venue_id = %venue_id,
                        "Cancelling venue actor"
                    );
                    handle.cancel();
                    tasks.push((venue_id, task_handle));
                }
            }
        }

        // Venue actors close their routers on the way out.
        for (venue_id, task_handle) in tasks {
            match tokio::time::timeout(deadline, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "venue.actor.controller",
                        venue_id = %venue_id,
                        "Venue actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "venue.actor.controller",
                        venue_id = %venue_id,
                        error = ?e,
                        "Venue actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "venue.actor.controller",
                        venue_id = %venue_id,
                        "Venue actor shutdown timed out"
                    );
                }
            }
            self.metrics.venue_unloaded();
        }

        self.cancel_token.cancel();

        info!(
            target: "venue.actor.controller",
            server_id = %self.server_id,
            "Graceful shutdown complete"
        );
    }

    /// Reap venue actors whose task ended without the unload handshake.
    async fn check_venue_health(&mut self) {
        let finished: Vec<VenueId> = self
            .venues
            .iter()
            .filter_map(|(venue_id, slot)| match slot {
                VenueSlot::Loaded { task_handle, .. } if task_handle.is_finished() => {
                    Some(*venue_id)
                }
                _ => None,
            })
            .collect();

        for venue_id in finished {
            let Some(VenueSlot::Loaded { task_handle, .. }) = self.venues.remove(&venue_id) else {
                continue;
            };
            match task_handle.await {
                Ok(()) => {
                    info!(
                        target: "venue.actor.controller",
                        server_id = %self.server_id,
                        venue_id = %venue_id,
                        "Venue actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "venue.actor.controller",
                            server_id = %self.server_id,
                            venue_id = %venue_id,
                            error = ?join_error,
                            "Venue actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Venue);
                    }
                }
            }
            self.metrics.venue_unloaded();
        }
    }
}

/// Reject waiters the venue's access rule does not admit; return the rest.
fn reject_unadmitted(waiters: Vec<Waiter>, record: &VenueRecord) -> Vec<Waiter> {
    let mut admitted = Vec::with_capacity(waiters.len());
    for waiter in waiters {
        if waiter.admitted_by(record) {
            admitted.push(waiter);
        } else {
            crate::observability::metrics::record_guard_rejection("venue_access");
            waiter.reject(VenueError::Authorization(
                "The venue is not open".to_string(),
            ));
        }
    }
    admitted
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::mock::MockMediaTransport;
    use crate::store::memory::InMemoryVenueStore;
    use crate::venue::policy::{VenueUpdate, Visibility};
    use common::types::UserId;

    struct Fixture {
        store: Arc<InMemoryVenueStore>,
        media: Arc<MockMediaTransport>,
        controller: VenueControllerHandle,
        owner: UserId,
        venue_id: VenueId,
    }

    async fn fixture_with(media: MockMediaTransport) -> Fixture {
        let store = Arc::new(InMemoryVenueStore::new());
        let owner = UserId::new();
        let venue_id = store.create_venue("hall", owner).await.unwrap();
        let media = Arc::new(media);
        let controller = VenueControllerHandle::new(
            "venue-test".to_string(),
            Arc::clone(&store) as Arc<dyn VenueStore>,
            Arc::clone(&media) as Arc<dyn MediaTransport>,
            ActorMetrics::new(),
        );
        Fixture {
            store,
            media,
            controller,
            owner,
            venue_id,
        }
    }

    fn owner(f: &Fixture) -> Requester {
        Requester {
            user_id: f.owner,
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_read_and_router() {
        let f = fixture_with(MockMediaTransport::with_delay(Duration::from_millis(50))).await;
        let requester = owner(&f);

        let loads = (0..5).map(|_| f.controller.load_venue(f.venue_id, requester));
        let handles = futures::future::join_all(loads).await;

        let instances: HashSet<u64> = handles
            .into_iter()
            .map(|h| h.unwrap().instance())
            .collect();
        assert_eq!(instances.len(), 1);
        assert_eq!(f.store.venue_reads(), 1);
        assert_eq!(f.media.routers_created(), 1);
    }

    #[tokio::test]
    async fn test_closed_venue_rejects_without_router() {
        let f = fixture_with(MockMediaTransport::accepting()).await;
        let stranger = Requester {
            user_id: UserId::new(),
            role: Role::User,
        };

        let result = f.controller.load_venue(f.venue_id, stranger).await;
        assert!(matches!(result, Err(VenueError::Authorization(_))));
        assert_eq!(f.media.routers_created(), 0);
        assert_eq!(f.controller.status().await.unwrap().loaded, 0);
    }

    #[tokio::test]
    async fn test_public_venue_admits_guests() {
        let f = fixture_with(MockMediaTransport::accepting()).await;
        f.store
            .update_venue(
                f.venue_id,
                &VenueUpdate {
                    visibility: Some(Visibility::Public),
                    ..VenueUpdate::default()
                },
            )
            .await
            .unwrap();
        let guest = Requester {
            user_id: UserId::new(),
            role: Role::Guest,
        };
        assert!(f.controller.load_venue(f.venue_id, guest).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_venue_not_found() {
        let f = fixture_with(MockMediaTransport::accepting()).await;
        let result = f.controller.load_venue(VenueId::new(), owner(&f)).await;
        assert!(matches!(result, Err(VenueError::VenueNotFound(_))));
    }

    #[tokio::test]
    async fn test_router_failure_clears_slot() {
        let f = fixture_with(MockMediaTransport::failing()).await;
        let first = f.controller.load_venue(f.venue_id, owner(&f)).await;
        assert!(matches!(first, Err(VenueError::Media(_))));

        let second = f.controller.load_venue(f.venue_id, owner(&f)).await;
        assert!(matches!(second, Err(VenueError::Media(_))));
        assert_eq!(f.media.routers_created(), 2);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let f = fixture_with(MockMediaTransport::accepting()).await;
        let handle = f.controller.load_venue(f.venue_id, owner(&f)).await.unwrap();

        let loaded = f.controller.delete_venue(f.venue_id, owner(&f)).await;
        assert!(matches!(loaded, Err(VenueError::Precondition(_))));

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The finished actor is reaped after the next message is handled.
        let _ = f.controller.status().await.unwrap();
        assert_eq!(f.controller.status().await.unwrap().loaded, 0);

        let stranger = Requester {
            user_id: UserId::new(),
            role: Role::Moderator,
        };
        let denied = f.controller.delete_venue(f.venue_id, stranger).await;
        assert!(matches!(denied, Err(VenueError::Authorization(_))));

        f.controller.delete_venue(f.venue_id, owner(&f)).await.unwrap();
        assert!(matches!(
            f.store.get_venue(f.venue_id).await,
            Err(VenueError::VenueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_loaded() {
        let f = fixture_with(MockMediaTransport::accepting()).await;
        assert!(f.controller.list_loaded().await.unwrap().is_empty());

        f.controller.load_venue(f.venue_id, owner(&f)).await.unwrap();
        let loaded = f.controller.list_loaded().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "hall");
        assert_eq!(loaded[0].visibility, Visibility::Private);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_loads_and_closes_routers() {
        let f = fixture_with(MockMediaTransport::accepting()).await;
        f.controller.load_venue(f.venue_id, owner(&f)).await.unwrap();

        f.controller.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(f.controller.is_cancelled());
        assert_eq!(f.media.routers()[0].close_calls(), 1);

        assert!(f.controller.load_venue(f.venue_id, owner(&f)).await.is_err());
    }
}
