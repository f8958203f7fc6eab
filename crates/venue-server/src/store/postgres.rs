//! Postgres-backed venue store.
//!
//! All queries are parameterized. Cascades (cameras with their venue, portals
//! with either endpoint, `main_camera_id` on camera delete) are enforced by
//! foreign keys in `migrations/`.

use super::{CameraRecord, CameraUpdate, PortalRecord, VenueRecord, VenueStore, VenueSummary};
use crate::errors::VenueError;
use crate::observability::metrics;
use crate::venue::graph::Portal;
use crate::venue::policy::{VenueSettings, VenueUpdate, Visibility};
use chrono::{DateTime, Utc};
use common::types::{CameraId, SenderId, UserId, VenueId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::instrument;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct VenueRow {
    name: String,
    visibility: String,
    doors_auto_open: bool,
    doors_opening_time: Option<DateTime<Utc>>,
    doors_manually_opened: bool,
    stream_auto_start: bool,
    stream_start_time: Option<DateTime<Utc>>,
    stream_manually_started: bool,
    stream_manually_ended: bool,
    main_camera_id: Option<Uuid>,
}

impl VenueRow {
    fn into_settings(self) -> VenueSettings {
        VenueSettings {
            name: self.name,
            visibility: Visibility::from_stored(&self.visibility),
            doors_auto_open: self.doors_auto_open,
            doors_opening_time: self.doors_opening_time,
            doors_manually_opened: self.doors_manually_opened,
            stream_auto_start: self.stream_auto_start,
            stream_start_time: self.stream_start_time,
            stream_manually_started: self.stream_manually_started,
            stream_manually_ended: self.stream_manually_ended,
            main_camera_id: self.main_camera_id.map(CameraId::from),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CameraRow {
    camera_id: Uuid,
    venue_id: Uuid,
    name: String,
    sender_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PortalRow {
    from_camera_id: Uuid,
    to_camera_id: Uuid,
    x: f64,
    y: f64,
    distance: f64,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    venue_id: Uuid,
    name: String,
    visibility: String,
}

fn camera_record(row: CameraRow, portals: &[PortalRow]) -> CameraRecord {
    CameraRecord {
        id: CameraId::from(row.camera_id),
        venue_id: VenueId::from(row.venue_id),
        name: row.name,
        sender_id: row.sender_id.map(SenderId),
        portals: portals
            .iter()
            .filter(|p| p.from_camera_id == row.camera_id)
            .map(|p| PortalRecord {
                to_camera_id: CameraId::from(p.to_camera_id),
                x: p.x,
                y: p.y,
                distance: p.distance,
            })
            .collect(),
    }
}

async fn timed<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, VenueError>>,
) -> Result<T, VenueError> {
    let start = Instant::now();
    let result = fut.await;
    metrics::record_store_latency(operation, start.elapsed());
    if let Err(e) = &result {
        tracing::warn!(target: "venue.store", operation, error = %e, "Store operation failed");
    }
    result
}

/// Connect a pool, optionally applying bundled migrations.
///
/// # Errors
///
/// Returns `VenueError::Store` if the database is unreachable or a migration
/// fails.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    run_migrations: bool,
) -> Result<PgPool, VenueError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| VenueError::Store(format!("migration failed: {e}")))?;
        tracing::info!(target: "venue.store", "Database migrations applied");
    }

    Ok(pool)
}

/// [`VenueStore`] over a Postgres pool.
#[derive(Clone)]
pub struct PgVenueStore {
    pool: PgPool,
}

impl PgVenueStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn camera_in(
        tx: &mut Transaction<'_, Postgres>,
        camera_id: CameraId,
    ) -> Result<CameraRecord, VenueError> {
        let row: CameraRow = sqlx::query_as(
            r#"
            SELECT camera_id, venue_id, name, sender_id
            FROM cameras
            WHERE camera_id = $1
            "#,
        )
        .bind(camera_id.0)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| VenueError::CameraNotFound(camera_id.to_string()))?;

        let portals: Vec<PortalRow> = sqlx::query_as(
            r#"
            SELECT from_camera_id, to_camera_id, x, y, distance
            FROM camera_portals
            WHERE from_camera_id = $1
            "#,
        )
        .bind(camera_id.0)
        .fetch_all(&mut **tx)
        .await?;

        Ok(camera_record(row, &portals))
    }
}

#[async_trait::async_trait]
impl VenueStore for PgVenueStore {
    #[instrument(skip_all)]
    async fn create_venue(&self, name: &str, owner: UserId) -> Result<VenueId, VenueError> {
        timed("create_venue", async {
            let venue_id = VenueId::new();
            let mut tx = self.pool.begin().await?;
            sqlx::query("INSERT INTO venues (venue_id, name) VALUES ($1, $2)")
                .bind(venue_id.0)
                .bind(name)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO venue_owners (venue_id, user_id) VALUES ($1, $2)")
                .bind(venue_id.0)
                .bind(owner.0)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(venue_id)
        })
        .await
    }

    #[instrument(skip_all, fields(venue_id = %venue_id))]
    async fn delete_venue(&self, venue_id: VenueId) -> Result<(), VenueError> {
        timed("delete_venue", async {
            let result = sqlx::query("DELETE FROM venues WHERE venue_id = $1")
                .bind(venue_id.0)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(VenueError::VenueNotFound(venue_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip_all, fields(venue_id = %venue_id))]
    async fn get_venue(&self, venue_id: VenueId) -> Result<VenueRecord, VenueError> {
        timed("get_venue", async {
            let row: VenueRow = sqlx::query_as(
                r#"
                SELECT name, visibility, doors_auto_open, doors_opening_time,
                       doors_manually_opened, stream_auto_start, stream_start_time,
                       stream_manually_started, stream_manually_ended, main_camera_id
                FROM venues
                WHERE venue_id = $1
                "#,
            )
            .bind(venue_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VenueError::VenueNotFound(venue_id.to_string()))?;

            let owners: Vec<(Uuid,)> =
                sqlx::query_as("SELECT user_id FROM venue_owners WHERE venue_id = $1")
                    .bind(venue_id.0)
                    .fetch_all(&self.pool)
                    .await?;

            let cameras: Vec<CameraRow> = sqlx::query_as(
                r#"
                SELECT camera_id, venue_id, name, sender_id
                FROM cameras
                WHERE venue_id = $1
                ORDER BY created_at
                "#,
            )
            .bind(venue_id.0)
            .fetch_all(&self.pool)
            .await?;

            let portals: Vec<PortalRow> = sqlx::query_as(
                r#"
                SELECT p.from_camera_id, p.to_camera_id, p.x, p.y, p.distance
                FROM camera_portals p
                JOIN cameras c ON c.camera_id = p.from_camera_id
                WHERE c.venue_id = $1
                "#,
            )
            .bind(venue_id.0)
            .fetch_all(&self.pool)
            .await?;

            Ok(VenueRecord {
                id: venue_id,
                owners: owners.into_iter().map(|(id,)| UserId::from(id)).collect(),
                settings: row.into_settings(),
                cameras: cameras
                    .into_iter()
                    .map(|c| camera_record(c, &portals))
                    .collect(),
            })
        })
        .await
    }

    #[instrument(skip_all)]
    async fn list_owned_venues(&self, owner: UserId) -> Result<Vec<VenueSummary>, VenueError> {
        timed("list_owned_venues", async {
            let rows: Vec<SummaryRow> = sqlx::query_as(
                r#"
                SELECT v.venue_id, v.name, v.visibility
                FROM venues v
                JOIN venue_owners o ON o.venue_id = v.venue_id
                WHERE o.user_id = $1
                ORDER BY v.name
                "#,
            )
            .bind(owner.0)
            .fetch_all(&self.pool)
            .await?;

            Ok(rows
                .into_iter()
                .map(|r| VenueSummary {
                    venue_id: VenueId::from(r.venue_id),
                    name: r.name,
                    visibility: Visibility::from_stored(&r.visibility),
                })
                .collect())
        })
        .await
    }

    #[instrument(skip_all, fields(venue_id = %venue_id))]
    async fn update_venue(
        &self,
        venue_id: VenueId,
        update: &VenueUpdate,
    ) -> Result<VenueSettings, VenueError> {
        timed("update_venue", async {
            let mut tx = self.pool.begin().await?;
            let row: VenueRow = sqlx::query_as(
                r#"
                SELECT name, visibility, doors_auto_open, doors_opening_time,
                       doors_manually_opened, stream_auto_start, stream_start_time,
                       stream_manually_started, stream_manually_ended, main_camera_id
                FROM venues
                WHERE venue_id = $1
                FOR UPDATE
                "#,
            )
            .bind(venue_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| VenueError::VenueNotFound(venue_id.to_string()))?;

            let mut settings = row.into_settings();
            update.apply_to(&mut settings);

            if let Some(main) = settings.main_camera_id {
                let owned: Option<(Uuid,)> = sqlx::query_as(
                    "SELECT camera_id FROM cameras WHERE camera_id = $1 AND venue_id = $2",
                )
                .bind(main.0)
                .bind(venue_id.0)
                .fetch_optional(&mut *tx)
                .await?;
                if owned.is_none() {
                    return Err(VenueError::CameraNotFound(main.to_string()));
                }
            }

            sqlx::query(
                r#"
                UPDATE venues
                SET name = $2,
                    visibility = $3,
                    doors_auto_open = $4,
                    doors_opening_time = $5,
                    doors_manually_opened = $6,
                    stream_auto_start = $7,
                    stream_start_time = $8,
                    stream_manually_started = $9,
                    stream_manually_ended = $10,
                    main_camera_id = $11
                WHERE venue_id = $1
                "#,
            )
            .bind(venue_id.0)
            .bind(&settings.name)
            .bind(settings.visibility.as_str())
            .bind(settings.doors_auto_open)
            .bind(settings.doors_opening_time)
            .bind(settings.doors_manually_opened)
            .bind(settings.stream_auto_start)
            .bind(settings.stream_start_time)
            .bind(settings.stream_manually_started)
            .bind(settings.stream_manually_ended)
            .bind(settings.main_camera_id.map(|c| c.0))
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(settings)
        })
        .await
    }

    #[instrument(skip_all, fields(venue_id = %venue_id))]
    async fn create_camera(
        &self,
        venue_id: VenueId,
        name: &str,
        sender_id: Option<&SenderId>,
    ) -> Result<CameraRecord, VenueError> {
        timed("create_camera", async {
            let row: CameraRow = sqlx::query_as(
                r#"
                INSERT INTO cameras (camera_id, venue_id, name, sender_id)
                SELECT $1, venue_id, $3, $4 FROM venues WHERE venue_id = $2
                RETURNING camera_id, venue_id, name, sender_id
                "#,
            )
            .bind(CameraId::new().0)
            .bind(venue_id.0)
            .bind(name)
            .bind(sender_id.map(SenderId::as_str))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VenueError::VenueNotFound(venue_id.to_string()))?;

            Ok(camera_record(row, &[]))
        })
        .await
    }

    #[instrument(skip_all, fields(camera_id = %camera_id))]
    async fn get_camera(&self, camera_id: CameraId) -> Result<CameraRecord, VenueError> {
        timed("get_camera", async {
            let mut tx = self.pool.begin().await?;
            let record = Self::camera_in(&mut tx, camera_id).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    #[instrument(skip_all, fields(camera_id = %camera_id))]
    async fn update_camera(
        &self,
        camera_id: CameraId,
        update: &CameraUpdate,
    ) -> Result<CameraRecord, VenueError> {
        timed("update_camera", async {
            let mut tx = self.pool.begin().await?;
            if let Some(name) = &update.name {
                sqlx::query("UPDATE cameras SET name = $2 WHERE camera_id = $1")
                    .bind(camera_id.0)
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(sender_id) = &update.sender_id {
                sqlx::query("UPDATE cameras SET sender_id = $2 WHERE camera_id = $1")
                    .bind(camera_id.0)
                    .bind(sender_id.as_ref().map(SenderId::as_str))
                    .execute(&mut *tx)
                    .await?;
            }
            let record = Self::camera_in(&mut tx, camera_id).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    #[instrument(skip_all, fields(camera_id = %camera_id))]
    async fn delete_camera(&self, camera_id: CameraId) -> Result<Vec<CameraId>, VenueError> {
        timed("delete_camera", async {
            let mut tx = self.pool.begin().await?;
            let referencing: Vec<(Uuid,)> = sqlx::query_as(
                "SELECT from_camera_id FROM camera_portals WHERE to_camera_id = $1",
            )
            .bind(camera_id.0)
            .fetch_all(&mut *tx)
            .await?;

            let result = sqlx::query("DELETE FROM cameras WHERE camera_id = $1")
                .bind(camera_id.0)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(VenueError::CameraNotFound(camera_id.to_string()));
            }

            tx.commit().await?;
            Ok(referencing
                .into_iter()
                .map(|(id,)| CameraId::from(id))
                .collect())
        })
        .await
    }

    #[instrument(skip_all, fields(from = %from, to = %to))]
    async fn upsert_portal(
        &self,
        from: CameraId,
        to: CameraId,
        portal: &Portal,
    ) -> Result<(), VenueError> {
        timed("upsert_portal", async {
            sqlx::query(
                r#"
                INSERT INTO camera_portals (from_camera_id, to_camera_id, x, y, distance)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (from_camera_id, to_camera_id) DO UPDATE
                SET x = EXCLUDED.x, y = EXCLUDED.y, distance = EXCLUDED.distance
                "#,
            )
            .bind(from.0)
            .bind(to.0)
            .bind(portal.x)
            .bind(portal.y)
            .bind(portal.distance)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                // Foreign key violation: one of the cameras is gone
                sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23503") => {
                    VenueError::CameraNotFound(format!("{from} -> {to}"))
                }
                other => VenueError::from(other),
            })?;
            Ok(())
        })
        .await
    }

    #[instrument(skip_all, fields(from = %from, to = %to))]
    async fn delete_portal(&self, from: CameraId, to: CameraId) -> Result<(), VenueError> {
        timed("delete_portal", async {
            let result = sqlx::query(
                "DELETE FROM camera_portals WHERE from_camera_id = $1 AND to_camera_id = $2",
            )
            .bind(from.0)
            .bind(to.0)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(VenueError::PortalNotFound(format!("{from} -> {to}")));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_venue_round_trip_with_cameras(pool: PgPool) {
        let store = PgVenueStore::new(pool);
        let owner = UserId::new();
        let venue_id = store.create_venue("hall", owner).await.unwrap();
        let a = store.create_camera(venue_id, "a", None).await.unwrap();
        let b = store
            .create_camera(venue_id, "b", Some(&SenderId::from("cam-b")))
            .await
            .unwrap();
        store
            .upsert_portal(a.id, b.id, &Portal::new(0.5, 0.5, 2.0).unwrap())
            .await
            .unwrap();

        let record = store.get_venue(venue_id).await.unwrap();
        assert_eq!(record.owners, vec![owner]);
        assert_eq!(record.cameras.len(), 2);
        let loaded_a = record.cameras.iter().find(|c| c.id == a.id).unwrap();
        assert_eq!(loaded_a.portals.len(), 1);
        let loaded_b = record.cameras.iter().find(|c| c.id == b.id).unwrap();
        assert!(loaded_b.portals.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_duplicate_camera_name_is_conflict(pool: PgPool) {
        let store = PgVenueStore::new(pool);
        let venue_id = store.create_venue("hall", UserId::new()).await.unwrap();
        store.create_camera(venue_id, "stage", None).await.unwrap();

        let result = store.create_camera(venue_id, "stage", None).await;
        assert!(matches!(result, Err(VenueError::Conflict(_))));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_delete_camera_clears_main_and_reports_sources(pool: PgPool) {
        let store = PgVenueStore::new(pool);
        let venue_id = store.create_venue("hall", UserId::new()).await.unwrap();
        let a = store.create_camera(venue_id, "a", None).await.unwrap();
        let b = store.create_camera(venue_id, "b", None).await.unwrap();
        let portal = Portal::new(0.1, 0.1, 1.0).unwrap();
        store.upsert_portal(a.id, b.id, &portal).await.unwrap();
        store
            .update_venue(
                venue_id,
                &VenueUpdate {
                    main_camera_id: Some(Some(b.id)),
                    ..VenueUpdate::default()
                },
            )
            .await
            .unwrap();

        let referencing = store.delete_camera(b.id).await.unwrap();
        assert_eq!(referencing, vec![a.id]);

        let record = store.get_venue(venue_id).await.unwrap();
        assert_eq!(record.settings.main_camera_id, None);
        assert!(record.cameras[0].portals.is_empty());
    }
}
