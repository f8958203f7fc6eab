//! In-memory aggregate for one loaded venue.
//!
//! Owned exclusively by the venue actor. Every mutable part sits in a
//! [`Tracked`] cell so the projector knows which snapshots to recompute.

use super::graph::CameraGraph;
use super::policy::VenueInfo;
use super::reactive::{DirtySet, Field, Tracked};
use crate::errors::VenueError;
use crate::media::{ConsumerId, MediaKind, ProducerId, TransportDirection, TransportId};
use crate::store::VenueRecord;
use common::types::{CameraId, ConnectionId, Role, SenderId, UserId, VenueId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// What a session may do in a venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    /// Joins cameras and the sub-space, consumes media.
    Receiver,
    /// Publisher-only device feeding a camera.
    Publisher { sender_id: SenderId },
}

impl MemberKind {
    #[must_use]
    pub fn client_type(&self) -> ClientType {
        match self {
            MemberKind::Receiver => ClientType::Client,
            MemberKind::Publisher { .. } => ClientType::Sender,
        }
    }

    #[must_use]
    pub fn sender_id(&self) -> Option<&SenderId> {
        match self {
            MemberKind::Receiver => None,
            MemberKind::Publisher { sender_id } => Some(sender_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Client,
    Sender,
}

/// A consumer a receiver holds on some camera's producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerEntry {
    pub producer_id: ProducerId,
    pub camera_id: CameraId,
}

/// Collaborator ids owned by one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaState {
    pub rtp_capabilities: Option<Value>,
    pub transports: BTreeMap<TransportId, TransportDirection>,
    pub producers: BTreeMap<ProducerId, MediaKind>,
    pub consumers: BTreeMap<ConsumerId, ConsumerEntry>,
}

impl MediaState {
    /// Consumers attached to producers on `camera_id`.
    #[must_use]
    pub fn consumers_on(&self, camera_id: CameraId) -> Vec<ConsumerId> {
        self.consumers
            .iter()
            .filter(|(_, c)| c.camera_id == camera_id)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// A session that has joined the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub kind: MemberKind,
    pub media: MediaState,
}

impl Member {
    #[must_use]
    pub fn is_publisher(&self) -> bool {
        matches!(self.kind, MemberKind::Publisher { .. })
    }
}

/// Session registry plus the lobby sub-space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Members {
    sessions: BTreeMap<ConnectionId, Member>,
    subspace: BTreeSet<ConnectionId>,
}

impl Members {
    #[must_use]
    pub fn get(&self, connection_id: ConnectionId) -> Option<&Member> {
        self.sessions.get(&connection_id)
    }

    pub fn require(&self, connection_id: ConnectionId) -> Result<&Member, VenueError> {
        self.sessions
            .get(&connection_id)
            .ok_or_else(|| VenueError::SessionNotFound(connection_id.to_string()))
    }

    pub fn require_mut(&mut self, connection_id: ConnectionId) -> Result<&mut Member, VenueError> {
        self.sessions
            .get_mut(&connection_id)
            .ok_or_else(|| VenueError::SessionNotFound(connection_id.to_string()))
    }

    #[must_use]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    pub fn insert(&mut self, member: Member) {
        self.sessions.insert(member.connection_id, member);
    }

    /// Remove a session and its sub-space seat.
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Member> {
        self.subspace.remove(&connection_id);
        self.sessions.remove(&connection_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Member> {
        self.sessions.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sessions.values().filter(|m| !m.is_publisher()).count()
    }

    #[must_use]
    pub fn publisher_count(&self) -> usize {
        self.sessions.values().filter(|m| m.is_publisher()).count()
    }

    /// Publisher session presenting `sender_id`.
    #[must_use]
    pub fn publisher_with_sender(&self, sender_id: &SenderId) -> Option<ConnectionId> {
        self.sessions
            .values()
            .find(|m| m.kind.sender_id() == Some(sender_id))
            .map(|m| m.connection_id)
    }

    #[must_use]
    pub fn subspace(&self) -> &BTreeSet<ConnectionId> {
        &self.subspace
    }

    /// Returns false if already inside.
    pub fn enter_subspace(&mut self, connection_id: ConnectionId) -> bool {
        self.subspace.insert(connection_id)
    }

    /// Returns false if not inside.
    pub fn leave_subspace(&mut self, connection_id: ConnectionId) -> bool {
        self.subspace.remove(&connection_id)
    }
}

/// The venue aggregate.
#[derive(Debug)]
pub struct VenueModel {
    pub id: VenueId,
    pub info: Tracked<VenueInfo>,
    pub main_audio_camera: Tracked<Option<CameraId>>,
    pub cameras: Tracked<CameraGraph>,
    pub members: Tracked<Members>,
    /// Fields written since the projector last flushed.
    pub dirty: DirtySet,
}

impl VenueModel {
    #[must_use]
    pub fn from_record(record: &VenueRecord) -> Self {
        Self {
            id: record.id,
            info: Tracked::new(Field::Info, record.info()),
            main_audio_camera: Tracked::new(Field::MainAudioCamera, None),
            cameras: Tracked::new(
                Field::Cameras,
                CameraGraph::from_records(&record.cameras),
            ),
            members: Tracked::new(Field::Members, Members::default()),
            dirty: DirtySet::default(),
        }
    }

    /// Hand the accumulated dirty set to the caller and reset it.
    pub fn take_dirty(&mut self) -> DirtySet {
        std::mem::take(&mut self.dirty)
    }

    /// First audio producer of the publisher attached to the main audio camera.
    #[must_use]
    pub fn main_audio_producer(&self) -> Option<ProducerId> {
        let camera_id = (*self.main_audio_camera)?;
        let sender = self.cameras.get(camera_id)?.sender?;
        self.members
            .get(sender)?
            .media
            .producers
            .iter()
            .find(|(_, kind)| **kind == MediaKind::Audio)
            .map(|(id, _)| id.clone())
    }

    /// Producers published into `camera_id` by its attached sender.
    #[must_use]
    pub fn camera_producers(&self, camera_id: CameraId) -> BTreeMap<ProducerId, MediaKind> {
        self.cameras
            .get(camera_id)
            .and_then(|c| c.sender)
            .and_then(|sender| self.members.get(sender))
            .map(|m| m.media.producers.clone())
            .unwrap_or_default()
    }

    /// Publisher sessions not attached to any camera.
    #[must_use]
    pub fn detached_senders(&self) -> Vec<&Member> {
        self.members
            .iter()
            .filter(|m| m.is_publisher())
            .filter(|m| self.cameras.camera_of_sender(m.connection_id).is_none())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
