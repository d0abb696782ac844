//! SQLite storage layer for Geolockr.
//!
//! Two tables:
//!
//! - `regions`: the registered geofences, so monitoring survives a restart.
//!   Containment state is deliberately absent: after a restart every region
//!   is UNKNOWN again and its first fix is silent.
//! - `transition_events`: history of detected transitions.
//!
//! Timestamps are stored as Unix milliseconds.

use anyhow::{Context, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};

use crate::model::{GeofenceRegion, LocationFix, Transition, TransitionEvent, WatchedTransitions};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string
    ///   (e.g., "sqlite:geolockr.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Each in-memory connection is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS regions (
                id TEXT PRIMARY KEY NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius_meters REAL NOT NULL,
                watch INTEGER NOT NULL,
                expires_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transition_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                region_id TEXT NOT NULL,
                transition TEXT NOT NULL,
                ts INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for time-range queries over the event history
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transition_events_ts
            ON transition_events(ts)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a region. A replaced region keeps its load order.
    pub async fn save_region(&self, region: &GeofenceRegion) -> anyhow::Result<()> {
        upsert_region(region).execute(&self.pool).await?;

        Ok(())
    }

    /// Atomically replace every stored region with `region`.
    pub async fn replace_all_regions(&self, region: &GeofenceRegion) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM regions").execute(&mut *tx).await?;
        upsert_region(region).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete a region. Returns whether it existed.
    pub async fn delete_region(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM regions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_all_regions(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM regions")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// All stored regions, in the order they were first saved.
    pub async fn load_regions(&self) -> anyhow::Result<Vec<GeofenceRegion>> {
        let rows = sqlx::query(
            r#"
            SELECT id, latitude, longitude, radius_meters, watch, expires_at
            FROM regions
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(region_from_row).collect()
    }

    /// Close the pool. Every later query fails.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn insert_event(&self, event: &TransitionEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transition_events (region_id, transition, ts, latitude, longitude)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.region_id)
        .bind(event.transition.as_str())
        .bind(event.timestamp.timestamp_millis())
        .bind(event.fix.latitude)
        .bind(event.fix.longitude)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Events from the last `minutes` before `now`, oldest first.
    pub async fn recent_events(
        &self,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<TransitionEvent>> {
        let now_ts = now.timestamp_millis();
        let start_ts = now_ts - i64::from(minutes) * 60_000;

        let rows = sqlx::query(
            r#"
            SELECT region_id, transition, ts, latitude, longitude
            FROM transition_events
            WHERE ts >= ? AND ts <= ?
            ORDER BY ts, id
            "#,
        )
        .bind(start_ts)
        .bind(now_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }
}

fn upsert_region(region: &GeofenceRegion) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO regions (id, latitude, longitude, radius_meters, watch, expires_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            radius_meters = excluded.radius_meters,
            watch = excluded.watch,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(&region.id)
    .bind(region.latitude)
    .bind(region.longitude)
    .bind(region.radius_meters)
    .bind(i64::from(region.watch.bits()))
    .bind(region.expires_at.map(|at| at.timestamp_millis()))
}

fn from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp {ms} out of range"))
}

fn region_from_row(row: &SqliteRow) -> anyhow::Result<GeofenceRegion> {
    let watch: i64 = row.get("watch");
    let expires_at: Option<i64> = row.get("expires_at");

    Ok(GeofenceRegion {
        id: row.get("id"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        radius_meters: row.get("radius_meters"),
        watch: WatchedTransitions::from_bits(
            u8::try_from(watch).context("stored watch mask out of range")?,
        ),
        expires_at: expires_at.map(from_millis).transpose()?,
    })
}

fn event_from_row(row: &SqliteRow) -> anyhow::Result<TransitionEvent> {
    let transition = match row.get::<String, _>("transition").as_str() {
        "enter" => Transition::Enter,
        "exit" => Transition::Exit,
        other => return Err(anyhow!("unknown transition '{other}'")),
    };
    let timestamp = from_millis(row.get("ts"))?;

    Ok(TransitionEvent {
        region_id: row.get("region_id"),
        transition,
        timestamp,
        fix: LocationFix::new(row.get("latitude"), row.get("longitude"), timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup_test_storage() -> Storage {
        Storage::new("sqlite::memory:").await.unwrap()
    }

    fn event_at(region_id: &str, transition: Transition, ts: DateTime<Utc>) -> TransitionEvent {
        TransitionEvent {
            region_id: region_id.to_string(),
            transition,
            timestamp: ts,
            fix: LocationFix::new(1.5, -2.5, ts),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_regions() {
        let storage = setup_test_storage().await;
        let expires = Utc.timestamp_millis_opt(1_900_000_000_000).unwrap();

        storage
            .save_region(&GeofenceRegion::new("b", 1.0, 2.0, 50.0, WatchedTransitions::EXIT))
            .await
            .unwrap();
        storage
            .save_region(
                &GeofenceRegion::new("a", 3.0, 4.0, 75.0, WatchedTransitions::BOTH)
                    .with_expiration(expires),
            )
            .await
            .unwrap();

        let regions = storage.load_regions().await.unwrap();

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].id, "b");
        assert_eq!(regions[0].watch, WatchedTransitions::EXIT);
        assert!(regions[0].expires_at.is_none());
        assert_eq!(regions[1].expires_at, Some(expires));
    }

    #[tokio::test]
    async fn test_save_region_upserts() {
        let storage = setup_test_storage().await;
        storage
            .save_region(&GeofenceRegion::new("a", 0.0, 0.0, 10.0, WatchedTransitions::BOTH))
            .await
            .unwrap();
        storage
            .save_region(&GeofenceRegion::new("b", 0.0, 0.0, 10.0, WatchedTransitions::BOTH))
            .await
            .unwrap();
        storage
            .save_region(&GeofenceRegion::new("a", 0.0, 0.0, 99.0, WatchedTransitions::ENTER))
            .await
            .unwrap();

        let regions = storage.load_regions().await.unwrap();

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].id, "a");
        assert_eq!(regions[0].radius_meters, 99.0);
    }

    #[tokio::test]
    async fn test_delete_regions() {
        let storage = setup_test_storage().await;
        for id in ["a", "b", "c"] {
            storage
                .save_region(&GeofenceRegion::new(id, 0.0, 0.0, 10.0, WatchedTransitions::BOTH))
                .await
                .unwrap();
        }

        assert!(storage.delete_region("b").await.unwrap());
        assert!(!storage.delete_region("b").await.unwrap());
        assert_eq!(storage.load_regions().await.unwrap().len(), 2);

        storage.delete_all_regions().await.unwrap();
        assert!(storage.load_regions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_regions() {
        let storage = setup_test_storage().await;
        for id in ["a", "b"] {
            storage
                .save_region(&GeofenceRegion::new(id, 0.0, 0.0, 10.0, WatchedTransitions::BOTH))
                .await
                .unwrap();
        }

        let lock = GeofenceRegion::new("c", 1.0, 1.0, 10.0, WatchedTransitions::ENTER);
        storage.replace_all_regions(&lock).await.unwrap();

        let regions = storage.load_regions().await.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].id, "c");
    }

    #[tokio::test]
    async fn test_closed_storage_fails() {
        let storage = setup_test_storage().await;
        storage.close().await;

        assert!(storage.load_regions().await.is_err());
        assert!(
            storage
                .save_region(&GeofenceRegion::new("a", 0.0, 0.0, 10.0, WatchedTransitions::BOTH))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_recent_events_window() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        storage
            .insert_event(&event_at("old", Transition::Exit, now - Duration::minutes(90)))
            .await
            .unwrap();
        storage
            .insert_event(&event_at("zone", Transition::Exit, now - Duration::minutes(30)))
            .await
            .unwrap();
        storage
            .insert_event(&event_at("zone", Transition::Enter, now - Duration::minutes(5)))
            .await
            .unwrap();

        let events = storage.recent_events(60, now).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].transition, Transition::Exit);
        assert_eq!(events[1].transition, Transition::Enter);
        assert_eq!(events[1].fix.longitude, -2.5);
    }
}
