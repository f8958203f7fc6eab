//! Process-local venue store.
//!
//! Used by tests and by `VENUE_STORE_BACKEND=memory`. Mirrors the Postgres
//! constraints: camera names unique per venue, portals cascade with their
//! cameras, deleting the main camera clears it.

use super::{CameraRecord, CameraUpdate, PortalRecord, VenueRecord, VenueStore, VenueSummary};
use crate::errors::VenueError;
use crate::venue::graph::Portal;
use crate::venue::policy::{VenueSettings, VenueUpdate};
use common::types::{CameraId, SenderId, UserId, VenueId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct VenueRow {
    owners: Vec<UserId>,
    settings: VenueSettings,
}

#[derive(Debug, Clone)]
struct CameraRow {
    venue_id: VenueId,
    name: String,
    sender_id: Option<SenderId>,
}

#[derive(Debug, Default)]
struct Tables {
    venues: HashMap<VenueId, VenueRow>,
    cameras: BTreeMap<CameraId, CameraRow>,
    portals: BTreeMap<(CameraId, CameraId), Portal>,
}

impl Tables {
    fn camera_record(&self, camera_id: CameraId) -> Result<CameraRecord, VenueError> {
        let row = self
            .cameras
            .get(&camera_id)
            .ok_or_else(|| VenueError::CameraNotFound(camera_id.to_string()))?;
        let portals = self
            .portals
            .iter()
            .filter(|((from, _), _)| *from == camera_id)
            .map(|((_, to), p)| PortalRecord {
                to_camera_id: *to,
                x: p.x,
                y: p.y,
                distance: p.distance,
            })
            .collect();

        Ok(CameraRecord {
            id: camera_id,
            venue_id: row.venue_id,
            name: row.name.clone(),
            sender_id: row.sender_id.clone(),
            portals,
        })
    }

    fn name_taken(&self, venue_id: VenueId, name: &str, except: Option<CameraId>) -> bool {
        self.cameras
            .iter()
            .any(|(id, c)| c.venue_id == venue_id && c.name == name && Some(*id) != except)
    }
}

/// In-memory [`VenueStore`] with a venue-read counter, failure injection and
/// a switch that holds calls indefinitely.
#[derive(Debug, Default)]
pub struct InMemoryVenueStore {
    tables: Mutex<Tables>,
    venue_reads: AtomicUsize,
    failing: AtomicBool,
    stalled: AtomicBool,
    parked: AtomicUsize,
    resume: Notify,
}

impl InMemoryVenueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_venue` calls served.
    pub fn venue_reads(&self) -> usize {
        self.venue_reads.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with `VenueError::Store`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// While set, every call waits until it is cleared again.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
        if !stalled {
            self.resume.notify_waiters();
        }
    }

    /// Calls currently held by [`set_stalled`](Self::set_stalled).
    pub fn stalled_calls(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    async fn wait_if_stalled(&self) {
        let mut parked = false;
        loop {
            let resumed = self.resume.notified();
            if !self.stalled.load(Ordering::SeqCst) {
                break;
            }
            if !parked {
                parked = true;
                self.parked.fetch_add(1, Ordering::SeqCst);
            }
            resumed.await;
        }
        if parked {
            self.parked.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Add an owner to an existing venue.
    pub fn add_owner(&self, venue_id: VenueId, owner: UserId) -> Result<(), VenueError> {
        let mut tables = self.lock()?;
        let venue = tables
            .venues
            .get_mut(&venue_id)
            .ok_or_else(|| VenueError::VenueNotFound(venue_id.to_string()))?;
        if !venue.owners.contains(&owner) {
            venue.owners.push(owner);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, VenueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VenueError::Store("store unavailable".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| VenueError::Internal("store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl VenueStore for InMemoryVenueStore {
    async fn create_venue(&self, name: &str, owner: UserId) -> Result<VenueId, VenueError> {
        self.wait_if_stalled().await;
        let mut tables = self.lock()?;
        let venue_id = VenueId::new();
        tables.venues.insert(
            venue_id,
            VenueRow {
                owners: vec![owner],
                settings: VenueSettings::named(name),
            },
        );
        Ok(venue_id)
    }

    async fn delete_venue(&self, venue_id: VenueId) -> Result<(), VenueError> {
        self.wait_if_stalled().await;
        let mut tables = self.lock()?;
        tables
            .venues
            .remove(&venue_id)
            .ok_or_else(|| VenueError::VenueNotFound(venue_id.to_string()))?;

        let camera_ids: Vec<CameraId> = tables
            .cameras
            .iter()
            .filter(|(_, c)| c.venue_id == venue_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &camera_ids {
            tables.cameras.remove(id);
        }
        tables
            .portals
            .retain(|(from, to), _| !camera_ids.contains(from) && !camera_ids.contains(to));
        Ok(())
    }

    async fn get_venue(&self, venue_id: VenueId) -> Result<VenueRecord, VenueError> {
        self.venue_reads.fetch_add(1, Ordering::SeqCst);
        self.wait_if_stalled().await;
        let tables = self.lock()?;
        let row = tables
            .venues
            .get(&venue_id)
            .ok_or_else(|| VenueError::VenueNotFound(venue_id.to_string()))?;

        let cameras = tables
            .cameras
            .iter()
            .filter(|(_, c)| c.venue_id == venue_id)
            .map(|(id, _)| tables.camera_record(*id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VenueRecord {
            id: venue_id,
            owners: row.owners.clone(),
            settings: row.settings.clone(),
            cameras,
        })
    }

    async fn list_owned_venues(&self, owner: UserId) -> Result<Vec<VenueSummary>, VenueError> {
        self.wait_if_stalled().await;
        let tables = self.lock()?;
        let mut venues: Vec<VenueSummary> = tables
            .venues
            .iter()
            .filter(|(_, v)| v.owners.contains(&owner))
            .map(|(id, v)| VenueSummary {
                venue_id: *id,
                name: v.settings.name.clone(),
                visibility: v.settings.visibility,
            })
            .collect();
        venues.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(venues)
    }

    async fn update_venue(
        &self,
        venue_id: VenueId,
        update: &VenueUpdate,
    ) -> Result<VenueSettings, VenueError> {
        self.wait_if_stalled().await;
        let mut tables = self.lock()?;
        if let Some(Some(main)) = update.main_camera_id {
            if tables.cameras.get(&main).map(|c| c.venue_id) != Some(venue_id) {
                return Err(VenueError::CameraNotFound(main.to_string()));
            }
        }
        let row = tables
            .venues
            .get_mut(&venue_id)
            .ok_or_else(|| VenueError::VenueNotFound(venue_id.to_string()))?;
        update.apply_to(&mut row.settings);
        Ok(row.settings.clone())
    }

    async fn create_camera(
        &self,
        venue_id: VenueId,
        name: &str,
        sender_id: Option<&SenderId>,
    ) -> Result<CameraRecord, VenueError> {
        self.wait_if_stalled().await;
        let mut tables = self.lock()?;
        if !tables.venues.contains_key(&venue_id) {
            return Err(VenueError::VenueNotFound(venue_id.to_string()));
        }
        if tables.name_taken(venue_id, name, None) {
            return Err(VenueError::Conflict(
                "A camera with that name already exists".to_string(),
            ));
        }

        let camera_id = CameraId::new();
        tables.cameras.insert(
            camera_id,
            CameraRow {
                venue_id,
                name: name.to_string(),
                sender_id: sender_id.cloned(),
            },
        );
        tables.camera_record(camera_id)
    }

    async fn get_camera(&self, camera_id: CameraId) -> Result<CameraRecord, VenueError> {
        self.wait_if_stalled().await;
        self.lock()?.camera_record(camera_id)
    }

    async fn update_camera(
        &self,
        camera_id: CameraId,
        update: &CameraUpdate,
    ) -> Result<CameraRecord, VenueError> {
        self.wait_if_stalled().await;
        let mut tables = self.lock()?;
        let venue_id = tables
            .cameras
            .get(&camera_id)
            .map(|c| c.venue_id)
            .ok_or_else(|| VenueError::CameraNotFound(camera_id.to_string()))?;

        if let Some(name) = &update.name {
            if tables.name_taken(venue_id, name, Some(camera_id)) {
                return Err(VenueError::Conflict(
                    "A camera with that name already exists".to_string(),
                ));
            }
        }

        let row = tables
            .cameras
            .get_mut(&camera_id)
            .ok_or_else(|| VenueError::CameraNotFound(camera_id.to_string()))?;
        if let Some(name) = &update.name {
            row.name.clone_from(name);
        }
        if let Some(sender_id) = &update.sender_id {
            row.sender_id.clone_from(sender_id);
        }
        tables.camera_record(camera_id)
    }

    async fn delete_camera(&self, camera_id: CameraId) -> Result<Vec<CameraId>, VenueError> {
        self.wait_if_stalled().await;
        let mut tables = self.lock()?;
        let row = tables
            .cameras
            .remove(&camera_id)
            .ok_or_else(|| VenueError::CameraNotFound(camera_id.to_string()))?;

        let referencing: Vec<CameraId> = tables
            .portals
            .keys()
            .filter(|(_, to)| *to == camera_id)
            .map(|(from, _)| *from)
            .collect();
        tables
            .portals
            .retain(|(from, to), _| *from != camera_id && *to != camera_id);

        if let Some(venue) = tables.venues.get_mut(&row.venue_id) {
            if venue.settings.main_camera_id == Some(camera_id) {
                venue.settings.main_camera_id = None;
            }
        }
        Ok(referencing)
    }

    async fn upsert_portal(
        &self,
        from: CameraId,
        to: CameraId,
        portal: &Portal,
    ) -> Result<(), VenueError> {
        self.wait_if_stalled().await;
        let mut tables = self.lock()?;
        for id in [from, to] {
            if !tables.cameras.contains_key(&id) {
                return Err(VenueError::CameraNotFound(id.to_string()));
            }
        }
        tables.portals.insert((from, to), *portal);
        Ok(())
    }

    async fn delete_portal(&self, from: CameraId, to: CameraId) -> Result<(), VenueError> {
        self.wait_if_stalled().await;
        self.lock()?
            .portals
            .remove(&(from, to))
            .map(|_| ())
            .ok_or_else(|| VenueError::PortalNotFound(format!("{from} -> {to}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn venue_with_cameras(store: &InMemoryVenueStore, names: &[&str]) -> (VenueId, Vec<CameraId>) {
        let venue_id = store.create_venue("hall", UserId::new()).await.unwrap();
        let mut ids = Vec::new();
        for name in names {
            ids.push(store.create_camera(venue_id, name, None).await.unwrap().id);
        }
        (venue_id, ids)
    }

    #[tokio::test]
    async fn test_get_venue_nests_cameras_and_counts_reads() {
        let store = InMemoryVenueStore::new();
        let (venue_id, ids) = venue_with_cameras(&store, &["a", "b"]).await;
        store
            .upsert_portal(ids[0], ids[1], &Portal::new(0.5, 0.5, 1.0).unwrap())
            .await
            .unwrap();

        let record = store.get_venue(venue_id).await.unwrap();
        assert_eq!(record.cameras.len(), 2);
        assert_eq!(store.venue_reads(), 1);

        let a = record.cameras.iter().find(|c| c.id == ids[0]).unwrap();
        assert_eq!(a.portals.len(), 1);
        assert_eq!(a.portals[0].to_camera_id, ids[1]);
    }

    #[tokio::test]
    async fn test_duplicate_camera_name_conflicts() {
        let store = InMemoryVenueStore::new();
        let (venue_id, _) = venue_with_cameras(&store, &["stage"]).await;

        let result = store.create_camera(venue_id, "stage", None).await;
        assert!(matches!(result, Err(VenueError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_camera_cascades_and_reports_referencing() {
        let store = InMemoryVenueStore::new();
        let (venue_id, ids) = venue_with_cameras(&store, &["a", "b", "c"]).await;
        let portal = Portal::new(0.1, 0.2, 1.0).unwrap();
        store.upsert_portal(ids[0], ids[2], &portal).await.unwrap();
        store.upsert_portal(ids[2], ids[1], &portal).await.unwrap();
        store
            .update_venue(
                venue_id,
                &VenueUpdate {
                    main_camera_id: Some(Some(ids[2])),
                    ..VenueUpdate::default()
                },
            )
            .await
            .unwrap();

        let referencing = store.delete_camera(ids[2]).await.unwrap();
        assert_eq!(referencing, vec![ids[0]]);

        let record = store.get_venue(venue_id).await.unwrap();
        assert!(record.cameras.iter().all(|c| c.portals.is_empty()));
        assert_eq!(record.settings.main_camera_id, None);
    }

    #[tokio::test]
    async fn test_delete_missing_portal() {
        let store = InMemoryVenueStore::new();
        let (_, ids) = venue_with_cameras(&store, &["a", "b"]).await;
        let result = store.delete_portal(ids[0], ids[1]).await;
        assert!(matches!(result, Err(VenueError::PortalNotFound(_))));
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = InMemoryVenueStore::new();
        store.set_failing(true);
        let result = store.create_venue("hall", UserId::new()).await;
        assert!(matches!(result, Err(VenueError::Store(_))));
    }

    #[tokio::test]
    async fn test_stalled_store_holds_calls_until_resumed() {
        let store = std::sync::Arc::new(InMemoryVenueStore::new());
        let venue_id = store.create_venue("hall", UserId::new()).await.unwrap();
        store.set_stalled(true);

        let reader = {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move { store.get_venue(venue_id).await })
        };
        while store.stalled_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.venue_reads(), 1);
        assert!(!reader.is_finished());

        store.set_stalled(false);
        assert!(reader.await.unwrap().is_ok());
        assert_eq!(store.stalled_calls(), 0);
    }

    #[tokio::test]
    async fn test_list_owned_venues() {
        let store = InMemoryVenueStore::new();
        let owner = UserId::new();
        store.create_venue("b-side", owner).await.unwrap();
        store.create_venue("a-side", owner).await.unwrap();
        store.create_venue("other", UserId::new()).await.unwrap();

        let names: Vec<String> = store
            .list_owned_venues(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["a-side", "b-side"]);
    }

    #[tokio::test]
    async fn test_delete_venue_removes_cameras() {
        let store = InMemoryVenueStore::new();
        let (venue_id, ids) = venue_with_cameras(&store, &["a"]).await;
        store.delete_venue(venue_id).await.unwrap();

        assert!(matches!(
            store.get_camera(ids[0]).await,
            Err(VenueError::CameraNotFound(_))
        ));
        assert!(matches!(
            store.get_venue(venue_id).await,
            Err(VenueError::VenueNotFound(_))
        ));
    }
}
