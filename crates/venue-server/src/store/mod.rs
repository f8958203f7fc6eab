//! Persistence seam for venues, cameras and portals.
//!
//! Every mutation is written here first and mirrored in memory only after the
//! write succeeds. Two implementations exist: [`postgres::PgVenueStore`] for
//! deployments and [`memory::InMemoryVenueStore`] for tests and local runs.

pub mod memory;
pub mod postgres;

use crate::errors::VenueError;
use crate::venue::graph::Portal;
use crate::venue::policy::{double_option, VenueInfo, VenueSettings, VenueUpdate, Visibility};
use common::types::{CameraId, SenderId, UserId, VenueId};
use serde::{Deserialize, Serialize};

/// Persisted outgoing portal of a camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalRecord {
    pub to_camera_id: CameraId,
    pub x: f64,
    pub y: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraRecord {
    pub id: CameraId,
    pub venue_id: VenueId,
    pub name: String,
    pub sender_id: Option<SenderId>,
    pub portals: Vec<PortalRecord>,
}

/// Full venue read: settings, owners and nested cameras with portals.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueRecord {
    pub id: VenueId,
    pub owners: Vec<UserId>,
    pub settings: VenueSettings,
    pub cameras: Vec<CameraRecord>,
}

impl VenueRecord {
    #[must_use]
    pub fn info(&self) -> VenueInfo {
        VenueInfo {
            settings: self.settings.clone(),
            owners: self.owners.clone(),
        }
    }
}

/// Catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueSummary {
    pub venue_id: VenueId,
    pub name: String,
    pub visibility: Visibility,
}

/// Partial camera update. `senderId: null` clears the configured sender.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraUpdate {
    pub name: Option<String>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Option<SenderId>>,
}

/// Persistence operations.
///
/// Reads return `VenueNotFound`/`CameraNotFound`/`PortalNotFound` for missing
/// keys; unique-key violations return `Conflict`.
#[async_trait::async_trait]
pub trait VenueStore: Send + Sync {
    /// Create a venue owned by `owner` with default settings.
    async fn create_venue(&self, name: &str, owner: UserId) -> Result<VenueId, VenueError>;

    /// Delete a venue with all of its cameras and portals.
    async fn delete_venue(&self, venue_id: VenueId) -> Result<(), VenueError>;

    async fn get_venue(&self, venue_id: VenueId) -> Result<VenueRecord, VenueError>;

    async fn list_owned_venues(&self, owner: UserId) -> Result<Vec<VenueSummary>, VenueError>;

    /// Apply a partial update and return the resulting settings.
    async fn update_venue(
        &self,
        venue_id: VenueId,
        update: &VenueUpdate,
    ) -> Result<VenueSettings, VenueError>;

    /// Camera names are unique per venue.
    async fn create_camera(
        &self,
        venue_id: VenueId,
        name: &str,
        sender_id: Option<&SenderId>,
    ) -> Result<CameraRecord, VenueError>;

    async fn get_camera(&self, camera_id: CameraId) -> Result<CameraRecord, VenueError>;

    async fn update_camera(
        &self,
        camera_id: CameraId,
        update: &CameraUpdate,
    ) -> Result<CameraRecord, VenueError>;

    /// Delete a camera and every portal touching it. Clears the venue's main
    /// camera if it pointed here. Returns the cameras that had a portal
    /// leading to the deleted one.
    async fn delete_camera(&self, camera_id: CameraId) -> Result<Vec<CameraId>, VenueError>;

    /// Create or update the portal `from -> to`.
    async fn upsert_portal(
        &self,
        from: CameraId,
        to: CameraId,
        portal: &Portal,
    ) -> Result<(), VenueError>;

    async fn delete_portal(&self, from: CameraId, to: CameraId) -> Result<(), VenueError>;
}
