//! Message types exchanged between actors.

use super::connection::ConnectionHandle;
use super::venue::VenueHandle;
use crate::errors::VenueError;
use crate::media::{
    ConsumerId, ConsumerInfo, MediaKind, MediaRouter, ProducerId, TransportDirection,
    TransportId, TransportInfo,
};
use crate::protocol::Frame;
use crate::store::{CameraRecord, CameraUpdate, VenueRecord, VenueSummary};
use crate::venue::graph::Portal;
use crate::venue::model::Member;
use crate::venue::policy::{VenueSettings, VenueUpdate};
use crate::venue::projection::{AdminVenueState, CameraState, PublicVenueState};
use common::types::{CameraId, ConnectionId, Role, SenderId, UserId, VenueId};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Reply channel for a fallible request.
pub type Reply<T> = oneshot::Sender<Result<T, VenueError>>;

/// Who is asking, for admission and ownership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: UserId,
    pub role: Role,
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

pub enum ControllerMessage {
    /// Load a venue or return the loaded instance.
    LoadVenue {
        venue_id: VenueId,
        requester: Requester,
        respond_to: Reply<VenueHandle>,
    },
    /// Completion of the store read started by a load.
    RecordFetched {
        venue_id: VenueId,
        result: Result<VenueRecord, VenueError>,
    },
    /// Completion of the router creation started by a load.
    RouterCreated {
        venue_id: VenueId,
        record: VenueRecord,
        result: Result<Arc<dyn MediaRouter>, VenueError>,
    },
    /// A venue actor has started unloading. Loads wait for it to finish.
    VenueUnloading { venue_id: VenueId, instance: u64 },
    /// A venue actor has closed its router and is exiting.
    VenueUnloaded { venue_id: VenueId, instance: u64 },
    DeleteVenue {
        venue_id: VenueId,
        requester: Requester,
        respond_to: Reply<()>,
    },
    DeleteFinished { venue_id: VenueId },
    ListLoaded {
        respond_to: oneshot::Sender<Vec<VenueSummary>>,
    },
    LoadedHandles {
        respond_to: oneshot::Sender<Vec<VenueHandle>>,
    },
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    pub loaded: usize,
    pub loading: usize,
    pub unloading: usize,
    pub connections: usize,
    pub mailbox_depth: usize,
}

// ----------------------------------------------------------------------------
// Venue
// ----------------------------------------------------------------------------

/// Result of joining a venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedVenue {
    pub venue_id: VenueId,
    /// Camera a publisher was auto-attached to.
    pub camera_id: Option<CameraId>,
}

/// A session's position inside a venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlacement {
    pub camera_id: Option<CameraId>,
    pub in_sub_space: bool,
}

/// Collaborator usage of one venue, for the operator console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueStats {
    pub venue_id: VenueId,
    pub name: String,
    pub router_id: String,
    pub cameras: usize,
    pub receivers: usize,
    pub publishers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

pub enum VenueMessage {
    AddSession {
        member: Member,
        connection: ConnectionHandle,
        respond_to: Reply<JoinedVenue>,
    },
    /// Remove a session. Unknown sessions are ignored; an empty venue unloads.
    RemoveSession {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<()>,
    },
    CheckAccess {
        requester: Requester,
        respond_to: Reply<()>,
    },
    SetDisplayName {
        connection_id: ConnectionId,
        username: String,
        respond_to: Reply<()>,
    },
    GetPlacement {
        connection_id: ConnectionId,
        respond_to: Reply<SessionPlacement>,
    },
    GetPublicState {
        respond_to: Reply<PublicVenueState>,
    },
    GetAdminState {
        respond_to: Reply<AdminVenueState>,
    },
    /// Push the current snapshot for `slot` to one session.
    Resend {
        connection_id: ConnectionId,
        slot: Slot,
        respond_to: Reply<()>,
    },
    Update {
        update: VenueUpdate,
        respond_to: Reply<VenueSettings>,
    },
    CreateCamera {
        name: String,
        sender_id: Option<SenderId>,
        respond_to: Reply<CameraRecord>,
    },
    UpdateCamera {
        camera_id: CameraId,
        update: CameraUpdate,
        respond_to: Reply<CameraRecord>,
    },
    DeleteCamera {
        camera_id: CameraId,
        respond_to: Reply<()>,
    },
    UpsertPortal {
        from: CameraId,
        to: CameraId,
        portal: Portal,
        respond_to: Reply<()>,
    },
    DeletePortal {
        from: CameraId,
        to: CameraId,
        respond_to: Reply<()>,
    },
    SetSenderForCamera {
        sender_id: SenderId,
        camera_id: CameraId,
        respond_to: Reply<()>,
    },
    SetMainAudioCamera {
        camera_id: Option<CameraId>,
        respond_to: Reply<()>,
    },
    JoinCamera {
        connection_id: ConnectionId,
        camera_id: CameraId,
        respond_to: Reply<CameraState>,
    },
    LeaveCamera {
        connection_id: ConnectionId,
        respond_to: Reply<()>,
    },
    GetCameraState {
        connection_id: ConnectionId,
        respond_to: Reply<CameraState>,
    },
    EnterSubSpace {
        connection_id: ConnectionId,
        respond_to: Reply<()>,
    },
    LeaveSubSpace {
        connection_id: ConnectionId,
        respond_to: Reply<()>,
    },
    GetRouterCapabilities {
        respond_to: Reply<Value>,
    },
    SetRtpCapabilities {
        connection_id: ConnectionId,
        rtp_capabilities: Value,
        respond_to: Reply<()>,
    },
    CreateTransport {
        connection_id: ConnectionId,
        direction: TransportDirection,
        respond_to: Reply<TransportInfo>,
    },
    ConnectTransport {
        connection_id: ConnectionId,
        transport_id: TransportId,
        dtls_parameters: Value,
        respond_to: Reply<()>,
    },
    CreateProducer {
        connection_id: ConnectionId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
        respond_to: Reply<ProducerId>,
    },
    CreateConsumer {
        connection_id: ConnectionId,
        transport_id: TransportId,
        producer_id: ProducerId,
        respond_to: Reply<ConsumerInfo>,
    },
    CloseProducer {
        connection_id: ConnectionId,
        producer_id: ProducerId,
        respond_to: Reply<()>,
    },
    CloseConsumer {
        connection_id: ConnectionId,
        consumer_id: ConsumerId,
        respond_to: Reply<()>,
    },
    GetStats {
        respond_to: Reply<VenueStats>,
    },
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// Notification slot. A session holds at most one subscription per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    VenueState,
    AdminState,
    CameraState,
    SubSpaceState,
}

impl Slot {
    pub const ALL: [Slot; 4] = [
        Slot::VenueState,
        Slot::AdminState,
        Slot::CameraState,
        Slot::SubSpaceState,
    ];

    /// Subject of pushed messages.
    #[must_use]
    pub const fn subject(&self) -> &'static str {
        match self {
            Slot::VenueState => "venue.state",
            Slot::AdminState => "venue.adminState",
            Slot::CameraState => "camera.state",
            Slot::SubSpaceState => "subspace.state",
        }
    }

    #[must_use]
    pub fn from_subject(subject: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.subject() == subject)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.subject()
    }
}

/// Events sent without a subscription.
pub mod events {
    pub const CAMERA_LEFT: &str = "camera.left";
    pub const CONSUMER_CLOSED: &str = "consumerClosed";
    pub const VENUE_LEFT: &str = "venue.left";
}

#[derive(Debug)]
pub enum ConnectionMessage {
    /// Snapshot for a slot; dropped unless the slot is subscribed.
    Push { slot: Slot, payload: Value },
    Event { subject: &'static str, data: Value },
    /// Response to a request.
    Respond { frame: Frame },
    Subscribe { slot: Slot, subscription_id: String },
    Unsubscribe { slot: Slot },
}
