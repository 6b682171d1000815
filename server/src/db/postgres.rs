//! PostgreSQL repository.

use async_trait::async_trait;
use calsync_engine::{
    CalendarEvent, DeltaCursor, EventFields, EventLink, StoreSnapshot, SyncCheckpoint,
};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::{RepositoryError, StateRepository};

fn invalid(reason: String) -> RepositoryError {
    RepositoryError::InvalidState(calsync_engine::Error::InvalidSnapshot(reason))
}

/// Read a BIGINT column holding an unsigned value.
fn from_column(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| invalid(format!("{} out of range: {}", column, value)))
}

/// Convert an unsigned value for a BIGINT column.
fn to_column(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| invalid(format!("{} out of range: {}", column, value)))
}

/// A stored event row.
#[derive(Debug)]
pub struct StoredEvent {
    pub id: String,
    pub title: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub location: Option<String>,
    pub description: Option<String>,
    pub last_modified: i64,
    pub revision: i64,
    pub deleted: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEvent {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            start_ms: row.try_get("start_ms")?,
            end_ms: row.try_get("end_ms")?,
            location: row.try_get("location")?,
            description: row.try_get("description")?,
            last_modified: row.try_get("last_modified")?,
            revision: row.try_get("revision")?,
            deleted: row.try_get("deleted")?,
        })
    }
}

impl StoredEvent {
    pub fn to_event(&self) -> Result<CalendarEvent, RepositoryError> {
        Ok(CalendarEvent {
            id: self.id.clone(),
            fields: EventFields {
                title: self.title.clone(),
                start: from_column("start_ms", self.start_ms)?,
                end: from_column("end_ms", self.end_ms)?,
                location: self.location.clone(),
                description: self.description.clone(),
            },
            last_modified: from_column("last_modified", self.last_modified)?,
            revision: from_column("revision", self.revision)?,
            deleted: self.deleted,
        })
    }
}

/// A stored link row.
#[derive(Debug)]
pub struct StoredLink {
    pub local_id: String,
    pub remote_id: String,
    pub synced_revision: i64,
    pub synced_etag: String,
    pub synced_fields: Json<EventFields>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredLink {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredLink {
            local_id: row.try_get("local_id")?,
            remote_id: row.try_get("remote_id")?,
            synced_revision: row.try_get("synced_revision")?,
            synced_etag: row.try_get("synced_etag")?,
            synced_fields: row.try_get("synced_fields")?,
        })
    }
}

impl StoredLink {
    pub fn to_link(&self) -> Result<EventLink, RepositoryError> {
        Ok(EventLink::new(
            self.local_id.clone(),
            self.remote_id.clone(),
            from_column("synced_revision", self.synced_revision)?,
            self.synced_etag.clone(),
            self.synced_fields.0.clone(),
        ))
    }
}

/// Event rows of a snapshot as column arrays, for `UNNEST` binds.
#[derive(Debug, Default)]
struct EventColumns {
    ids: Vec<String>,
    titles: Vec<String>,
    starts: Vec<i64>,
    ends: Vec<i64>,
    locations: Vec<Option<String>>,
    descriptions: Vec<Option<String>>,
    last_modified: Vec<i64>,
    revisions: Vec<i64>,
    deleted: Vec<bool>,
}

impl EventColumns {
    fn of(snapshot: &StoreSnapshot) -> Result<Self, RepositoryError> {
        let mut columns = Self::default();
        for event in snapshot.events.values() {
            columns.ids.push(event.id.clone());
            columns.titles.push(event.fields.title.clone());
            columns.starts.push(to_column("start_ms", event.fields.start)?);
            columns.ends.push(to_column("end_ms", event.fields.end)?);
            columns.locations.push(event.fields.location.clone());
            columns.descriptions.push(event.fields.description.clone());
            columns
                .last_modified
                .push(to_column("last_modified", event.last_modified)?);
            columns.revisions.push(to_column("revision", event.revision)?);
            columns.deleted.push(event.deleted);
        }
        Ok(columns)
    }
}

/// Link rows of a snapshot as column arrays.
#[derive(Debug, Default)]
struct LinkColumns {
    local_ids: Vec<String>,
    remote_ids: Vec<String>,
    synced_revisions: Vec<i64>,
    synced_etags: Vec<String>,
    synced_fields: Vec<Json<EventFields>>,
}

impl LinkColumns {
    fn of(snapshot: &StoreSnapshot) -> Result<Self, RepositoryError> {
        let mut columns = Self::default();
        for link in &snapshot.links {
            columns.local_ids.push(link.local_id.clone());
            columns.remote_ids.push(link.remote_id.clone());
            columns
                .synced_revisions
                .push(to_column("synced_revision", link.synced_revision)?);
            columns.synced_etags.push(link.synced_etag.clone());
            columns.synced_fields.push(Json(link.synced_fields.clone()));
        }
        Ok(columns)
    }
}

/// [`StateRepository`] over the `calendar_events`, `event_links` and
/// `sync_checkpoint` tables.
///
/// Saves run in a single transaction and only touch rows that differ from
/// the snapshot.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateRepository for PgRepository {
    async fn load(&self) -> Result<Option<StoreSnapshot>, RepositoryError> {
        let events = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT id, title, start_ms, end_ms, location, description,
                   last_modified, revision, deleted
            FROM calendar_events
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let links = sqlx::query_as::<_, StoredLink>(
            r#"
            SELECT local_id, remote_id, synced_revision, synced_etag, synced_fields
            FROM event_links
            ORDER BY local_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let checkpoint: Option<(Option<i64>, Option<String>)> =
            sqlx::query_as(r#"SELECT last_sync_at, cursor FROM sync_checkpoint WHERE id = 1"#)
                .fetch_optional(&self.pool)
                .await?;

        if events.is_empty() && checkpoint.is_none() {
            return Ok(None);
        }

        let mut snapshot = StoreSnapshot::new();
        for stored in &events {
            snapshot.add_event(stored.to_event()?);
        }
        for stored in &links {
            snapshot.add_link(stored.to_link()?);
        }
        if let Some((last_sync, cursor)) = checkpoint {
            snapshot.checkpoint = SyncCheckpoint {
                last_sync: last_sync
                    .map(|ts| from_column("last_sync_at", ts))
                    .transpose()?,
                cursor: cursor.map(DeltaCursor::new),
            };
        }
        snapshot.validate()?;

        tracing::debug!(
            events = events.len(),
            links = links.len(),
            "Loaded state from database"
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), RepositoryError> {
        let events = EventColumns::of(snapshot)?;
        let links = LinkColumns::of(snapshot)?;
        let last_sync = snapshot
            .checkpoint
            .last_sync
            .map(|ts| to_column("last_sync_at", ts))
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        // Links cascade with their events
        let purged = sqlx::query("DELETE FROM calendar_events WHERE id <> ALL($1::text[])")
            .bind(&events.ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM event_links AS l
            WHERE NOT EXISTS (
                SELECT 1 FROM UNNEST($1::text[], $2::text[]) AS s(local_id, remote_id)
                WHERE s.local_id = l.local_id AND s.remote_id = l.remote_id
            )
            "#,
        )
        .bind(&links.local_ids)
        .bind(&links.remote_ids)
        .execute(&mut *tx)
        .await?;

        let written = sqlx::query(
            r#"
            INSERT INTO calendar_events (
                id, title, start_ms, end_ms, location, description,
                last_modified, revision, deleted
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::bigint[], $4::bigint[], $5::text[],
                $6::text[], $7::bigint[], $8::bigint[], $9::bool[]
            )
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                start_ms = EXCLUDED.start_ms,
                end_ms = EXCLUDED.end_ms,
                location = EXCLUDED.location,
                description = EXCLUDED.description,
                last_modified = EXCLUDED.last_modified,
                revision = EXCLUDED.revision,
                deleted = EXCLUDED.deleted
            WHERE (
                calendar_events.title, calendar_events.start_ms, calendar_events.end_ms,
                calendar_events.location, calendar_events.description,
                calendar_events.last_modified, calendar_events.revision,
                calendar_events.deleted
            ) IS DISTINCT FROM (
                EXCLUDED.title, EXCLUDED.start_ms, EXCLUDED.end_ms,
                EXCLUDED.location, EXCLUDED.description,
                EXCLUDED.last_modified, EXCLUDED.revision, EXCLUDED.deleted
            )
            "#,
        )
        .bind(&events.ids)
        .bind(&events.titles)
        .bind(&events.starts)
        .bind(&events.ends)
        .bind(&events.locations)
        .bind(&events.descriptions)
        .bind(&events.last_modified)
        .bind(&events.revisions)
        .bind(&events.deleted)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO event_links (
                local_id, remote_id, synced_revision, synced_etag, synced_fields
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::bigint[], $4::text[], $5::jsonb[]
            )
            ON CONFLICT (local_id) DO UPDATE SET
                synced_revision = EXCLUDED.synced_revision,
                synced_etag = EXCLUDED.synced_etag,
                synced_fields = EXCLUDED.synced_fields
            WHERE (
                event_links.synced_revision, event_links.synced_etag,
                event_links.synced_fields
            ) IS DISTINCT FROM (
                EXCLUDED.synced_revision, EXCLUDED.synced_etag, EXCLUDED.synced_fields
            )
            "#,
        )
        .bind(&links.local_ids)
        .bind(&links.remote_ids)
        .bind(&links.synced_revisions)
        .bind(&links.synced_etags)
        .bind(&links.synced_fields)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sync_checkpoint (id, last_sync_at, cursor, updated_at)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                last_sync_at = EXCLUDED.last_sync_at,
                cursor = EXCLUDED.cursor,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(last_sync)
        .bind(snapshot.checkpoint.cursor.as_ref().map(|c| c.as_str().to_string()))
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            events = snapshot.event_count(),
            written,
            purged,
            "Saved state to database"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_event(revision: i64) -> StoredEvent {
        StoredEvent {
            id: "evt-1".to_string(),
            title: "Lunch".to_string(),
            start_ms: 1_000,
            end_ms: 2_000,
            location: None,
            description: Some("team".to_string()),
            last_modified: 5_000,
            revision,
            deleted: false,
        }
    }

    #[test]
    fn test_stored_event_conversion() {
        let event = stored_event(3).to_event().unwrap();
        assert_eq!(event.revision, 3);
        assert_eq!(event.fields.start, 1_000);
        assert_eq!(event.fields.description.as_deref(), Some("team"));
    }

    #[test]
    fn test_negative_column_is_rejected() {
        let result = stored_event(-1).to_event();
        assert!(matches!(
            result,
            Err(RepositoryError::InvalidState(
                calsync_engine::Error::InvalidSnapshot(_)
            ))
        ));

        let link = StoredLink {
            local_id: "evt-1".to_string(),
            remote_id: "r-1".to_string(),
            synced_revision: i64::MIN,
            synced_etag: "etag-1".to_string(),
            synced_fields: Json(EventFields::new("Lunch", 1_000, 2_000)),
        };
        assert!(link.to_link().is_err());
    }

    #[test]
    fn test_columns_follow_snapshot_order() {
        let mut snapshot = StoreSnapshot::new();
        let mut lunch = CalendarEvent::new("evt-b", EventFields::new("Lunch", 1_000, 2_000), 10);
        lunch.revision = 2;
        snapshot.add_event(lunch);
        snapshot.add_event(CalendarEvent::new(
            "evt-a",
            EventFields::new("Standup", 500, 900).with_location("Room 1"),
            20,
        ));

        let columns = EventColumns::of(&snapshot).unwrap();
        assert_eq!(columns.ids, vec!["evt-a", "evt-b"]);
        assert_eq!(columns.revisions, vec![0, 2]);
        assert_eq!(columns.locations, vec![Some("Room 1".to_string()), None]);
    }

    #[test]
    fn test_oversized_value_is_rejected() {
        let mut snapshot = StoreSnapshot::new();
        let mut event = CalendarEvent::new("evt-1", EventFields::new("Lunch", 1_000, 2_000), 10);
        event.revision = u64::MAX;
        snapshot.add_event(event);

        assert!(matches!(
            EventColumns::of(&snapshot),
            Err(RepositoryError::InvalidState(_))
        ));
    }
}
