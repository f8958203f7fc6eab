//! Snapshots derived from a [`VenueModel`] and the projector that keeps them
//! current.
//!
//! Each snapshot is a [`Memo`] over the model's tracked fields. After a
//! mutation the venue actor calls [`Projector::flush`] with the dirty set;
//! only memos whose dependencies were written recompute, and only snapshots
//! whose value actually changed are reported for pushing.
//!
//! The main audio producer is itself a memo. When it changes, the flush
//! marks [`Field::MainAudioProducer`] dirty before the public snapshot is
//! considered, so a producer appearing on the main audio camera republishes
//! the public state without the caller asking for it.

use super::graph::Camera;
use super::model::{ClientType, VenueModel};
use super::policy::Visibility;
use super::reactive::{DirtySet, Field, Memo};
use crate::media::{MediaKind, ProducerId};
use chrono::{DateTime, Utc};
use common::types::{CameraId, ConnectionId, Role, SenderId, UserId, VenueId};
use serde::Serialize;
use std::collections::BTreeMap;

const MAIN_AUDIO_DEPS: &[Field] = &[Field::MainAudioCamera, Field::Cameras, Field::Members];
const PUBLIC_DEPS: &[Field] = &[Field::Info, Field::Cameras, Field::MainAudioProducer];
const ADMIN_DEPS: &[Field] = &[
    Field::Info,
    Field::MainAudioCamera,
    Field::Cameras,
    Field::Members,
    Field::MainAudioProducer,
];
const CAMERA_DEPS: &[Field] = &[Field::Cameras, Field::Members];
const SUBSPACE_DEPS: &[Field] = &[Field::Members];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSummary {
    pub camera_id: CameraId,
    pub name: String,
}

/// State visible to every member.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicVenueState {
    pub venue_id: VenueId,
    pub name: String,
    pub visibility: Visibility,
    pub doors_auto_open: bool,
    pub doors_opening_time: Option<DateTime<Utc>>,
    pub doors_manually_opened: bool,
    pub doors_are_open: bool,
    pub stream_auto_start: bool,
    pub stream_start_time: Option<DateTime<Utc>>,
    pub stream_manually_started: bool,
    pub stream_manually_ended: bool,
    pub stream_is_active: bool,
    pub main_camera_id: Option<CameraId>,
    pub main_audio_producer_id: Option<ProducerId>,
    pub cameras: Vec<CameraSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalView {
    pub to_camera_id: CameraId,
    pub x: f64,
    pub y: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDetail {
    pub camera_id: CameraId,
    pub name: String,
    /// Configured sender identifier.
    pub sender_id: Option<SenderId>,
    /// Publisher session currently attached.
    pub attached_sender: Option<ConnectionId>,
    pub portals: Vec<PortalView>,
    pub receiver_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub client_type: ClientType,
    pub camera_id: Option<CameraId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedSender {
    pub connection_id: ConnectionId,
    pub sender_id: SenderId,
    pub username: String,
    pub producers: Vec<ProducerId>,
}

/// State visible to moderators and above.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminVenueState {
    pub venue_id: VenueId,
    pub owners: Vec<UserId>,
    pub sessions: Vec<SessionSummary>,
    pub cameras: Vec<CameraDetail>,
    pub detached_senders: Vec<DetachedSender>,
    pub main_camera_id: Option<CameraId>,
    pub main_audio_camera_id: Option<CameraId>,
    pub main_audio_producer_id: Option<ProducerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerView {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
}

/// State of one camera, pushed to its receivers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraState {
    pub camera_id: CameraId,
    pub name: String,
    pub portals: Vec<PortalView>,
    pub producers: Vec<ProducerView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubSpaceOccupant {
    pub connection_id: ConnectionId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubSpaceState {
    pub occupants: Vec<SubSpaceOccupant>,
}

/// Snapshots that changed in one flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionChanges {
    pub public: bool,
    pub admin: bool,
    pub cameras: Vec<CameraId>,
    pub subspace: bool,
}

impl ProjectionChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.public && !self.admin && !self.subspace && self.cameras.is_empty()
    }
}

/// Memoized snapshots for one venue.
#[derive(Debug)]
pub struct Projector {
    main_audio: Memo<Option<ProducerId>>,
    public: Memo<PublicVenueState>,
    admin: Memo<AdminVenueState>,
    cameras: BTreeMap<CameraId, Memo<CameraState>>,
    subspace: Memo<SubSpaceState>,
}

impl Default for Projector {
    fn default() -> Self {
        Self::new()
    }
}

impl Projector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            main_audio: Memo::new(MAIN_AUDIO_DEPS),
            public: Memo::new(PUBLIC_DEPS),
            admin: Memo::new(ADMIN_DEPS),
            cameras: BTreeMap::new(),
            subspace: Memo::new(SUBSPACE_DEPS),
        }
    }

    /// Recompute what `dirty` invalidated and report what changed.
    pub fn flush(
        &mut self,
        model: &VenueModel,
        mut dirty: DirtySet,
        now: DateTime<Utc>,
    ) -> ProjectionChanges {
        let mut changes = ProjectionChanges::default();

        self.main_audio.observe(dirty);
        if self.main_audio.refresh(|| model.main_audio_producer()) {
            dirty.mark(Field::MainAudioProducer);
        }
        let main_audio = self.main_audio_producer();

        self.public.observe(dirty);
        changes.public = self
            .public
            .refresh(|| public_state(model, main_audio.clone(), now));

        self.admin.observe(dirty);
        changes.admin = self
            .admin
            .refresh(|| admin_state(model, main_audio.clone()));

        self.cameras.retain(|id, _| model.cameras.get(*id).is_some());
        for camera in model.cameras.iter() {
            let memo = self
                .cameras
                .entry(camera.id)
                .or_insert_with(|| Memo::new(CAMERA_DEPS));
            memo.observe(dirty);
            if memo.refresh(|| camera_state(model, camera)) {
                changes.cameras.push(camera.id);
            }
        }

        self.subspace.observe(dirty);
        changes.subspace = self.subspace.refresh(|| subspace_state(model));

        changes
    }

    #[must_use]
    pub fn main_audio_producer(&self) -> Option<ProducerId> {
        self.main_audio.get().cloned().flatten()
    }

    #[must_use]
    pub fn public(&self) -> Option<&PublicVenueState> {
        self.public.get()
    }

    #[must_use]
    pub fn admin(&self) -> Option<&AdminVenueState> {
        self.admin.get()
    }

    #[must_use]
    pub fn camera(&self, camera_id: CameraId) -> Option<&CameraState> {
        self.cameras.get(&camera_id).and_then(Memo::get)
    }

    #[must_use]
    pub fn subspace(&self) -> Option<&SubSpaceState> {
        self.subspace.get()
    }
}

fn portal_views(camera: &Camera) -> Vec<PortalView> {
    camera
        .portals
        .iter()
        .map(|(to, p)| PortalView {
            to_camera_id: *to,
            x: p.x,
            y: p.y,
            distance: p.distance,
        })
        .collect()
}

fn public_state(
    model: &VenueModel,
    main_audio_producer_id: Option<ProducerId>,
    now: DateTime<Utc>,
) -> PublicVenueState {
    let settings = &model.info.settings;
    PublicVenueState {
        venue_id: model.id,
        name: settings.name.clone(),
        visibility: settings.visibility,
        doors_auto_open: settings.doors_auto_open,
        doors_opening_time: settings.doors_opening_time,
        doors_manually_opened: settings.doors_manually_opened,
        doors_are_open: settings.doors_are_open(now),
        stream_auto_start: settings.stream_auto_start,
        stream_start_time: settings.stream_start_time,
        stream_manually_started: settings.stream_manually_started,
        stream_manually_ended: settings.stream_manually_ended,
        stream_is_active: settings.stream_is_active(now),
        main_camera_id: settings.main_camera_id,
        main_audio_producer_id,
        cameras: model
            .cameras
            .iter()
            .map(|c| CameraSummary {
                camera_id: c.id,
                name: c.name.clone(),
            })
            .collect(),
    }
}

fn admin_state(model: &VenueModel, main_audio_producer_id: Option<ProducerId>) -> AdminVenueState {
    let sessions = model
        .members
        .iter()
        .map(|m| SessionSummary {
            connection_id: m.connection_id,
            user_id: m.user_id,
            username: m.username.clone(),
            role: m.role,
            client_type: m.kind.client_type(),
            camera_id: if m.is_publisher() {
                model.cameras.camera_of_sender(m.connection_id)
            } else {
                model.cameras.camera_of_receiver(m.connection_id)
            },
        })
        .collect();

    let cameras = model
        .cameras
        .iter()
        .map(|c| CameraDetail {
            camera_id: c.id,
            name: c.name.clone(),
            sender_id: c.configured_sender.clone(),
            attached_sender: c.sender,
            portals: portal_views(c),
            receiver_count: c.receivers.len(),
        })
        .collect();

    let detached_senders = model
        .detached_senders()
        .into_iter()
        .filter_map(|m| {
            m.kind.sender_id().map(|sender_id| DetachedSender {
                connection_id: m.connection_id,
                sender_id: sender_id.clone(),
                username: m.username.clone(),
                producers: m.media.producers.keys().cloned().collect(),
            })
        })
        .collect();

    AdminVenueState {
        venue_id: model.id,
        owners: model.info.owners.clone(),
        sessions,
        cameras,
        detached_senders,
        main_camera_id: model.info.settings.main_camera_id,
        main_audio_camera_id: *model.main_audio_camera,
        main_audio_producer_id,
    }
}

fn camera_state(model: &VenueModel, camera: &Camera) -> CameraState {
    CameraState {
        camera_id: camera.id,
        name: camera.name.clone(),
        portals: portal_views(camera),
        producers: model
            .camera_producers(camera.id)
            .into_iter()
            .map(|(producer_id, kind)| ProducerView { producer_id, kind })
            .collect(),
    }
}

fn subspace_state(model: &VenueModel) -> SubSpaceState {
    SubSpaceState {
        occupants: model
            .members
            .subspace()
            .iter()
            .filter_map(|id| model.members.get(*id))
            .map(|m| SubSpaceOccupant {
                connection_id: m.connection_id,
                username: m.username.clone(),
            })
            .collect(),
    }
}
