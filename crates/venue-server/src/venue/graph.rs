//! Camera/portal graph for one loaded venue.
//!
//! Cameras live in an arena keyed by [`CameraId`]. Portals are directed edges
//! stored on their source camera, keyed by destination id; `A -> B` never
//! implies `B -> A`. Sessions are referenced by [`ConnectionId`] only.

use crate::errors::VenueError;
use crate::store::{CameraRecord, PortalRecord};
use common::types::{CameraId, ConnectionId, SenderId, VenueId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Placement of a portal inside the source camera's view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Portal {
    /// Normalized horizontal offset in `[0, 1]`.
    pub x: f64,
    /// Normalized vertical offset in `[0, 1]`.
    pub y: f64,
    pub distance: f64,
}

impl Portal {
    /// Build a portal, rejecting offsets outside `[0, 1]` and negative or
    /// non-finite distances.
    pub fn new(x: f64, y: f64, distance: f64) -> Result<Self, VenueError> {
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            return Err(VenueError::InvalidInput(
                "Portal offsets must be between 0 and 1".to_string(),
            ));
        }
        if !distance.is_finite() || distance < 0.0 {
            return Err(VenueError::InvalidInput(
                "Portal distance must be a non-negative number".to_string(),
            ));
        }
        Ok(Self { x, y, distance })
    }
}

/// A camera node.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub id: CameraId,
    pub venue_id: VenueId,
    pub name: String,
    /// Sender identifier a publisher must present to be auto-attached.
    pub configured_sender: Option<SenderId>,
    /// Attached publisher session, if any.
    pub sender: Option<ConnectionId>,
    /// Outgoing portals keyed by destination camera.
    pub portals: BTreeMap<CameraId, Portal>,
    /// Receiver sessions currently in this camera.
    pub receivers: BTreeSet<ConnectionId>,
}

impl Camera {
    #[must_use]
    pub fn from_record(record: &CameraRecord) -> Self {
        Self {
            id: record.id,
            venue_id: record.venue_id,
            name: record.name.clone(),
            configured_sender: record.sender_id.clone(),
            sender: None,
            portals: portals_from_records(&record.portals),
            receivers: BTreeSet::new(),
        }
    }
}

fn portals_from_records(records: &[PortalRecord]) -> BTreeMap<CameraId, Portal> {
    records
        .iter()
        .map(|p| {
            (
                p.to_camera_id,
                Portal {
                    x: p.x,
                    y: p.y,
                    distance: p.distance,
                },
            )
        })
        .collect()
}

/// Result of attaching a publisher to a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderSwap {
    /// Camera the publisher was attached to before, if different.
    pub left_camera: Option<CameraId>,
    /// Publisher that previously occupied the target camera, now detached.
    pub displaced: Option<ConnectionId>,
}

/// All cameras of a venue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraGraph {
    cameras: BTreeMap<CameraId, Camera>,
}

impl CameraGraph {
    #[must_use]
    pub fn from_records(records: &[CameraRecord]) -> Self {
        Self {
            cameras: records
                .iter()
                .map(|r| (r.id, Camera::from_record(r)))
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Camera> {
        self.cameras.values()
    }

    #[must_use]
    pub fn get(&self, id: CameraId) -> Option<&Camera> {
        self.cameras.get(&id)
    }

    /// Look up a camera or fail with `CameraNotFound`.
    pub fn require(&self, id: CameraId) -> Result<&Camera, VenueError> {
        self.cameras
            .get(&id)
            .ok_or_else(|| VenueError::CameraNotFound(id.to_string()))
    }

    fn require_mut(&mut self, id: CameraId) -> Result<&mut Camera, VenueError> {
        self.cameras
            .get_mut(&id)
            .ok_or_else(|| VenueError::CameraNotFound(id.to_string()))
    }

    pub fn insert(&mut self, camera: Camera) {
        self.cameras.insert(camera.id, camera);
    }

    /// Remove a camera node with its outgoing portals.
    ///
    /// Edges pointing at it from other cameras are left alone; they go away
    /// when those cameras are reloaded.
    pub fn remove(&mut self, id: CameraId) -> Option<Camera> {
        self.cameras.remove(&id)
    }

    /// Replace persisted fields of a camera, keeping live attachments.
    pub fn reload(&mut self, record: &CameraRecord) {
        match self.cameras.get_mut(&record.id) {
            Some(camera) => {
                camera.name.clone_from(&record.name);
                camera.configured_sender.clone_from(&record.sender_id);
                camera.portals = portals_from_records(&record.portals);
            }
            None => self.insert(Camera::from_record(record)),
        }
    }

    /// Create or update the edge `from -> to`. Returns true if it was created.
    pub fn upsert_portal(
        &mut self,
        from: CameraId,
        to: CameraId,
        portal: Portal,
    ) -> Result<bool, VenueError> {
        if from == to {
            return Err(VenueError::InvalidInput(
                "A portal cannot lead to its own camera".to_string(),
            ));
        }
        self.require(to)?;
        let source = self.require_mut(from)?;
        Ok(source.portals.insert(to, portal).is_none())
    }

    pub fn remove_portal(&mut self, from: CameraId, to: CameraId) -> Result<Portal, VenueError> {
        self.require_mut(from)?
            .portals
            .remove(&to)
            .ok_or_else(|| VenueError::PortalNotFound(format!("{from} -> {to}")))
    }

    /// Cameras holding an edge that points at `target`.
    #[must_use]
    pub fn cameras_with_edge_to(&self, target: CameraId) -> Vec<CameraId> {
        self.cameras
            .values()
            .filter(|c| c.portals.contains_key(&target))
            .map(|c| c.id)
            .collect()
    }

    /// Camera whose configured sender identifier is `sender_id`.
    #[must_use]
    pub fn find_by_configured_sender(&self, sender_id: &SenderId) -> Option<CameraId> {
        self.cameras
            .values()
            .find(|c| c.configured_sender.as_ref() == Some(sender_id))
            .map(|c| c.id)
    }

    #[must_use]
    pub fn camera_of_sender(&self, connection_id: ConnectionId) -> Option<CameraId> {
        self.cameras
            .values()
            .find(|c| c.sender == Some(connection_id))
            .map(|c| c.id)
    }

    #[must_use]
    pub fn camera_of_receiver(&self, connection_id: ConnectionId) -> Option<CameraId> {
        self.cameras
            .values()
            .find(|c| c.receivers.contains(&connection_id))
            .map(|c| c.id)
    }

    /// Attach a publisher to `camera_id`, detaching it from wherever it was.
    pub fn attach_sender(
        &mut self,
        camera_id: CameraId,
        connection_id: ConnectionId,
    ) -> Result<SenderSwap, VenueError> {
        self.require(camera_id)?;

        let mut swap = SenderSwap::default();
        if let Some(previous) = self.camera_of_sender(connection_id) {
            if previous == camera_id {
                return Ok(swap);
            }
            self.detach_sender(connection_id);
            swap.left_camera = Some(previous);
        }

        let camera = self.require_mut(camera_id)?;
        swap.displaced = camera.sender.replace(connection_id);
        Ok(swap)
    }

    /// Detach a publisher. Returns the camera it was attached to.
    pub fn detach_sender(&mut self, connection_id: ConnectionId) -> Option<CameraId> {
        let camera = self
            .cameras
            .values_mut()
            .find(|c| c.sender == Some(connection_id))?;
        camera.sender = None;
        Some(camera.id)
    }

    /// Move a receiver into `camera_id`. Returns the camera it left, if any.
    pub fn join_receiver(
        &mut self,
        camera_id: CameraId,
        connection_id: ConnectionId,
    ) -> Result<Option<CameraId>, VenueError> {
        self.require(camera_id)?;
        let previous = self.camera_of_receiver(connection_id);
        if previous == Some(camera_id) {
            return Ok(None);
        }
        if previous.is_some() {
            self.leave_receiver(connection_id);
        }
        self.require_mut(camera_id)?.receivers.insert(connection_id);
        Ok(previous)
    }

    /// Remove a receiver from its camera. Returns the camera it left.
    pub fn leave_receiver(&mut self, connection_id: ConnectionId) -> Option<CameraId> {
        let camera = self
            .cameras
            .values_mut()
            .find(|c| c.receivers.contains(&connection_id))?;
        camera.receivers.remove(&connection_id);
        Some(camera.id)
    }

    /// Mutable access for in-place field updates.
    pub fn get_mut(&mut self, id: CameraId) -> Result<&mut Camera, VenueError> {
        self.require_mut(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(venue_id: VenueId, name: &str, sender: Option<&str>) -> CameraRecord {
        CameraRecord {
            id: CameraId::new(),
            venue_id,
            name: name.to_string(),
            sender_id: sender.map(SenderId::from),
            portals: Vec::new(),
        }
    }

    fn graph_with(names: &[&str]) -> (CameraGraph, Vec<CameraId>) {
        let venue_id = VenueId::new();
        let records: Vec<CameraRecord> = names.iter().map(|n| record(venue_id, n, None)).collect();
        let ids = records.iter().map(|r| r.id).collect();
        (CameraGraph::from_records(&records), ids)
    }

    #[test]
    fn test_portal_is_not_symmetric() {
        let (mut graph, ids) = graph_with(&["lobby", "stage"]);
        let (a, b) = (ids[0], ids[1]);

        let created = graph.upsert_portal(a, b, Portal::new(0.5, 0.5, 2.0).unwrap()).unwrap();
        assert!(created);

        assert_eq!(graph.get(a).unwrap().portals.len(), 1);
        assert!(graph.get(b).unwrap().portals.is_empty());
    }

    #[test]
    fn test_upsert_updates_existing_edge_in_place() {
        let (mut graph, ids) = graph_with(&["lobby", "stage"]);
        let (a, b) = (ids[0], ids[1]);

        graph.upsert_portal(a, b, Portal::new(0.1, 0.1, 1.0).unwrap()).unwrap();
        let created = graph.upsert_portal(a, b, Portal::new(0.9, 0.2, 3.0).unwrap()).unwrap();

        assert!(!created);
        let portal = graph.get(a).unwrap().portals[&b];
        assert!((portal.x - 0.9).abs() < f64::EPSILON);
        assert_eq!(graph.get(a).unwrap().portals.len(), 1);
    }

    #[test]
    fn test_portal_validation() {
        assert!(Portal::new(1.2, 0.0, 1.0).is_err());
        assert!(Portal::new(0.0, -0.1, 1.0).is_err());
        assert!(Portal::new(0.0, 0.0, -1.0).is_err());
        assert!(Portal::new(0.0, 0.0, f64::NAN).is_err());
        assert!(Portal::new(0.0, 1.0, 0.0).is_ok());
    }

    #[test]
    fn test_portal_to_unknown_or_self_rejected() {
        let (mut graph, ids) = graph_with(&["lobby"]);
        let portal = Portal::new(0.5, 0.5, 1.0).unwrap();

        assert!(matches!(
            graph.upsert_portal(ids[0], CameraId::new(), portal),
            Err(VenueError::CameraNotFound(_))
        ));
        assert!(matches!(
            graph.upsert_portal(ids[0], ids[0], portal),
            Err(VenueError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_remove_missing_portal_is_not_found() {
        let (mut graph, ids) = graph_with(&["lobby", "stage"]);
        assert!(matches!(
            graph.remove_portal(ids[0], ids[1]),
            Err(VenueError::PortalNotFound(_))
        ));
    }

    #[test]
    fn test_removed_camera_leaves_stale_edges_until_reload() {
        let (mut graph, ids) = graph_with(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        graph.upsert_portal(a, b, Portal::new(0.5, 0.5, 1.0).unwrap()).unwrap();

        graph.remove(b);
        assert_eq!(graph.cameras_with_edge_to(b), vec![a]);

        let mut reloaded = record(graph.get(a).unwrap().venue_id, "a", None);
        reloaded.id = a;
        graph.reload(&reloaded);
        assert!(graph.cameras_with_edge_to(b).is_empty());
    }

    #[test]
    fn test_reload_keeps_live_attachments() {
        let (mut graph, ids) = graph_with(&["a"]);
        let publisher = ConnectionId::new();
        let receiver = ConnectionId::new();
        graph.attach_sender(ids[0], publisher).unwrap();
        graph.join_receiver(ids[0], receiver).unwrap();

        let mut renamed = record(graph.get(ids[0]).unwrap().venue_id, "renamed", None);
        renamed.id = ids[0];
        graph.reload(&renamed);

        let camera = graph.get(ids[0]).unwrap();
        assert_eq!(camera.name, "renamed");
        assert_eq!(camera.sender, Some(publisher));
        assert!(camera.receivers.contains(&receiver));
    }

    #[test]
    fn test_attach_sender_moves_and_displaces() {
        let (mut graph, ids) = graph_with(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        graph.attach_sender(a, first).unwrap();
        graph.attach_sender(b, second).unwrap();

        let swap = graph.attach_sender(b, first).unwrap();
        assert_eq!(swap.left_camera, Some(a));
        assert_eq!(swap.displaced, Some(second));
        assert_eq!(graph.get(a).unwrap().sender, None);
        assert_eq!(graph.camera_of_sender(first), Some(b));
        assert_eq!(graph.camera_of_sender(second), None);
    }

    #[test]
    fn test_receiver_is_in_at_most_one_camera() {
        let (mut graph, ids) = graph_with(&["a", "b"]);
        let receiver = ConnectionId::new();

        assert_eq!(graph.join_receiver(ids[0], receiver).unwrap(), None);
        assert_eq!(graph.join_receiver(ids[1], receiver).unwrap(), Some(ids[0]));
        assert!(graph.get(ids[0]).unwrap().receivers.is_empty());
        assert_eq!(graph.camera_of_receiver(receiver), Some(ids[1]));

        assert_eq!(graph.leave_receiver(receiver), Some(ids[1]));
        assert_eq!(graph.leave_receiver(receiver), None);
    }

    #[test]
    fn test_find_by_configured_sender() {
        let venue_id = VenueId::new();
        let records = vec![record(venue_id, "a", Some("rig-1")), record(venue_id, "b", None)];
        let graph = CameraGraph::from_records(&records);

        assert_eq!(
            graph.find_by_configured_sender(&SenderId::from("rig-1")),
            Some(records[0].id)
        );
        assert_eq!(graph.find_by_configured_sender(&SenderId::from("rig-2")), None);
    }

    #[test]
    fn test_inert_camera_is_valid() {
        let (graph, ids) = graph_with(&["empty"]);
        let camera = graph.require(ids[0]).unwrap();
        assert!(camera.portals.is_empty());
        assert!(camera.sender.is_none());
    }
}
