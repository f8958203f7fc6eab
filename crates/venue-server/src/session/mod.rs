//! Per-connection session: identity, current venue and the request
//! dispatcher.
//!
//! A `Session` lives in the connection's reader task. Requests are handled
//! one at a time in receipt order; outbound frames go through the
//! connection's [`ConnectionHandle`], which venue actors also push to.
//!
//! A session's role comes from its identity token and never changes.

pub mod dispatcher;
pub mod procedures;

use crate::actors::{
    ConnectionHandle, JoinedVenue, Requester, VenueControllerHandle, VenueHandle,
};
use crate::auth::{GuardContext, Identity};
use crate::errors::VenueError;
use crate::store::VenueStore;
use crate::venue::model::{ClientType, Member, MediaState, MemberKind};
use common::types::{CameraId, ConnectionId, Role, SenderId, VenueId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

pub use procedures::Procedure;

/// Serialized answer to `session.getState`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub connection_id: ConnectionId,
    pub username: String,
    pub role: Role,
    pub client_type: ClientType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<SenderId>,
    pub venue_id: Option<VenueId>,
    pub camera_id: Option<CameraId>,
    pub in_sub_space: bool,
}

pub struct Session {
    connection_id: ConnectionId,
    identity: Identity,
    kind: MemberKind,
    connection: ConnectionHandle,
    controller: VenueControllerHandle,
    store: Arc<dyn VenueStore>,
    venue: Option<VenueHandle>,
    /// Venue a join was sent to and has not answered yet.
    joining: Option<VenueHandle>,
    active: bool,
}

impl Session {
    #[must_use]
    pub fn new(
        identity: Identity,
        kind: MemberKind,
        connection: ConnectionHandle,
        controller: VenueControllerHandle,
        store: Arc<dyn VenueStore>,
    ) -> Self {
        Self {
            connection_id: connection.connection_id(),
            identity,
            kind,
            connection,
            controller,
            store,
            venue: None,
            joining: None,
            active: true,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn kind(&self) -> &MemberKind {
        &self.kind
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Venue the session is currently in, if it is still loaded.
    #[must_use]
    pub fn venue(&self) -> Option<&VenueHandle> {
        self.venue.as_ref().filter(|v| !v.is_closed())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn requester(&self) -> Requester {
        Requester {
            user_id: self.identity.user_id,
            role: self.identity.role,
        }
    }

    fn guard_context(&self) -> GuardContext<'_> {
        GuardContext {
            connection_id: self.connection_id,
            user_id: self.identity.user_id,
            role: self.identity.role,
            kind: &self.kind,
            venue: self.venue(),
        }
    }

    fn require_venue(&self) -> Result<&VenueHandle, VenueError> {
        self.venue()
            .ok_or_else(|| VenueError::Precondition("Not in a venue".to_string()))
    }

    fn member(&self) -> Member {
        Member {
            connection_id: self.connection_id,
            user_id: self.identity.user_id,
            username: self.identity.username.clone(),
            role: self.identity.role,
            kind: self.kind.clone(),
            media: MediaState::default(),
        }
    }

    /// Join `venue_id`, loading it on demand. Leaves the current venue first.
    pub async fn join_venue(&mut self, venue_id: VenueId) -> Result<JoinedVenue, VenueError> {
        if !self.active {
            return Err(VenueError::Precondition("Session is closed".to_string()));
        }
        self.leave_current_venue().await;

        // The venue may unload between the load and the join; retry once.
        let mut attempts = 0;
        let (venue, joined) = loop {
            attempts += 1;
            let venue = self.controller.load_venue(venue_id, self.requester()).await?;
            // If this future is dropped before the reply, the venue may hold
            // the session anyway; leaving removes it from `joining`.
            self.joining = Some(venue.clone());
            let added = venue.add_session(self.member(), self.connection.clone()).await;
            self.joining = None;
            match added {
                Ok(joined) => break (venue, joined),
                Err(VenueError::VenueNotFound(_)) if attempts < 2 => {
                    debug!(
                        target: "venue.session",
                        connection_id = %self.connection_id,
                        venue_id = %venue_id,
                        "Venue unloaded during join, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            target: "venue.session",
            connection_id = %self.connection_id,
            venue_id = %venue_id,
            client_type = ?self.kind.client_type(),
            "Session joined venue"
        );
        self.venue = Some(venue);
        Ok(joined)
    }

    /// Leave the current venue.
    pub async fn leave_venue(&mut self) -> Result<(), VenueError> {
        if self.venue.is_none() {
            return Err(VenueError::Precondition("Not in a venue".to_string()));
        }
        self.leave_current_venue().await;
        Ok(())
    }

    async fn leave_current_venue(&mut self) {
        if let Some(venue) = self.joining.take() {
            venue.remove_session(self.connection_id).await;
            debug!(
                target: "venue.session",
                connection_id = %self.connection_id,
                venue_id = %venue.venue_id(),
                "Abandoned join withdrawn"
            );
        }
        if let Some(venue) = self.venue.take() {
            venue.remove_session(self.connection_id).await;
            debug!(
                target: "venue.session",
                connection_id = %self.connection_id,
                venue_id = %venue.venue_id(),
                "Session left venue"
            );
        }
    }

    pub async fn state(&self) -> SessionState {
        let placement = match self.venue() {
            Some(venue) => venue.placement(self.connection_id).await.ok(),
            None => None,
        };
        SessionState {
            connection_id: self.connection_id,
            username: self.identity.username.clone(),
            role: self.identity.role,
            client_type: self.kind.client_type(),
            sender_id: self.kind.sender_id().cloned(),
            venue_id: self.venue().map(VenueHandle::venue_id),
            camera_id: placement.as_ref().and_then(|p| p.camera_id),
            in_sub_space: placement.is_some_and(|p| p.in_sub_space),
        }
    }

    pub async fn set_display_name(&mut self, username: String) -> Result<(), VenueError> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(VenueError::InvalidInput(
                "Display name must not be empty".to_string(),
            ));
        }
        if let Some(venue) = self.venue() {
            venue
                .set_display_name(self.connection_id, username.clone())
                .await?;
        }
        self.identity.username = username;
        Ok(())
    }

    /// Tear the session down. Safe to call more than once.
    pub async fn on_disconnect(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.leave_current_venue().await;
        self.connection.cancel();
        debug!(
            target: "venue.session",
            connection_id = %self.connection_id,
            "Session disconnected"
        );
    }
}
