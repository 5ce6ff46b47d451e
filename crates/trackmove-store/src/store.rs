use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use trackmove::backend::check_update_supported;
use trackmove::{
    Activity, ActivityHeader, ActivityId, ActivityKind, Backend, BackendError, Capabilities,
    MetadataUpdate, Point, TimeRange, Track, TrackSummary,
};

use crate::schema;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        BackendError::Permanent(err.to_string())
    }
}

/// A SQLite-backed activity store that implements `Backend`.
///
/// Supports every capability. Track summaries are kept on the activity row
/// so listing never reads points.
pub struct ActivityStore {
    conn: Mutex<rusqlite::Connection>,
    label: String,
}

impl ActivityStore {
    /// Open a store backed by a file on disk, creating it if needed.
    pub fn open(path: &Path, label: impl Into<String>) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path)?;
        Self::with_connection(conn, label.into())
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(label: impl Into<String>) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::with_connection(conn, label.into())
    }

    fn with_connection(mut conn: rusqlite::Connection, label: String) -> Result<Self, StoreError> {
        schema::migrations()
            .to_latest(&mut conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::debug!(store = %label, "opened activity store");
        Ok(Self {
            conn: Mutex::new(conn),
            label,
        })
    }

    fn insert(&self, activity: &Activity, track: &Track) -> Result<ActivityId, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let keywords_json = serde_json::to_string(&activity.keywords())
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let summary = track.summary();
        tx.execute(
            "INSERT INTO activities
                (title, description, keywords_json, public, start_time, end_time, point_count, what)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                activity.title(),
                activity.description(),
                keywords_json,
                activity.public(),
                summary.map(|s| encode_time(s.time_range.start)),
                summary.map(|s| encode_time(s.time_range.end)),
                i64::try_from(track.len()).unwrap_or(i64::MAX),
                activity.what().as_str(),
            ],
        )?;
        let row_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO points (activity_id, seq, time, latitude, longitude, elevation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (seq, point) in track.points().iter().enumerate() {
                stmt.execute(rusqlite::params![
                    row_id,
                    i64::try_from(seq).unwrap_or(i64::MAX),
                    encode_time(point.time()),
                    point.latitude(),
                    point.longitude(),
                    point.elevation(),
                ])?;
            }
        }
        tx.commit()?;

        Ok(ActivityId::new(row_id.to_string()))
    }

    fn row_to_header(row: &rusqlite::Row) -> rusqlite::Result<ActivityHeader> {
        let id: i64 = row.get(0)?;
        let title: String = row.get(1)?;
        let description: String = row.get(2)?;
        let keywords_json: String = row.get(3)?;
        let public: bool = row.get(4)?;
        let start: Option<String> = row.get(5)?;
        let end: Option<String> = row.get(6)?;
        let point_count: i64 = row.get(7)?;
        let what: String = row.get(8)?;

        let keywords: Vec<String> = serde_json::from_str(&keywords_json).unwrap_or_default();
        let summary = match (start, end) {
            (Some(start), Some(end)) => Some(TrackSummary {
                time_range: TimeRange::new(decode_time(5, &start)?, decode_time(6, &end)?),
                point_count: usize::try_from(point_count).unwrap_or_default(),
            }),
            _ => None,
        };

        let what = ActivityKind::parse(&what).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(ActivityHeader {
            id: ActivityId::new(id.to_string()),
            title,
            description,
            keywords,
            public,
            what,
            summary,
        })
    }

    fn row_to_point(row: &rusqlite::Row) -> rusqlite::Result<Point> {
        let time: String = row.get(0)?;
        let latitude: f64 = row.get(1)?;
        let longitude: f64 = row.get(2)?;
        let elevation: Option<f64> = row.get(3)?;

        let point = Point::new(decode_time(0, &time)?, latitude, longitude);
        Ok(match elevation {
            Some(elevation) => point.with_elevation(elevation),
            None => point,
        })
    }
}

#[async_trait::async_trait]
impl Backend for ActivityStore {
    fn label(&self) -> &str {
        &self.label
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn list(&self) -> Result<Vec<ActivityHeader>, BackendError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT id, title, description, keywords_json, public,
                        start_time, end_time, point_count, what
                 FROM activities
                 ORDER BY start_time, id",
            )
            .map_err(StoreError::from)?;

        let headers = stmt
            .query_map([], Self::row_to_header)
            .map_err(StoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        Ok(headers)
    }

    async fn fetch(&self, id: &ActivityId) -> Result<Track, BackendError> {
        let row_id = parse_id(id)?;
        let conn = self.conn.lock().unwrap();

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM activities WHERE id = ?1)",
                [row_id],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        if !exists {
            return Err(BackendError::NotFound(id.clone()));
        }

        let mut stmt = conn
            .prepare(
                "SELECT time, latitude, longitude, elevation
                 FROM points
                 WHERE activity_id = ?1
                 ORDER BY seq",
            )
            .map_err(StoreError::from)?;
        let points = stmt
            .query_map([row_id], Self::row_to_point)
            .map_err(StoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        Ok(Track::new(points)?)
    }

    async fn save(&self, activity: &Activity) -> Result<ActivityId, BackendError> {
        let track = activity
            .track()
            .ok_or_else(|| BackendError::Permanent("activity track is not loaded".into()))?;
        let id = self.insert(activity, track)?;
        tracing::debug!(store = %self.label, activity = %id, points = track.len(), "stored activity");
        Ok(id)
    }

    async fn remove(&self, id: &ActivityId) -> Result<(), BackendError> {
        let row_id = parse_id(id)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(StoreError::from)?;

        tx.execute("DELETE FROM points WHERE activity_id = ?1", [row_id])
            .map_err(StoreError::from)?;
        let removed = tx
            .execute("DELETE FROM activities WHERE id = ?1", [row_id])
            .map_err(StoreError::from)?;
        if removed == 0 {
            return Err(BackendError::NotFound(id.clone()));
        }
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: &ActivityId,
        update: &MetadataUpdate,
    ) -> Result<(), BackendError> {
        check_update_supported(&self.label, &self.capabilities(), update)?;
        update.validate()?;
        let row_id = parse_id(id)?;

        let keywords_json = update
            .keywords
            .as_ref()
            .map(|keywords| {
                let sorted: BTreeSet<&str> = keywords
                    .iter()
                    .map(|k| k.trim())
                    .filter(|k| !k.is_empty())
                    .collect();
                serde_json::to_string(&sorted)
            })
            .transpose()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE activities SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    keywords_json = COALESCE(?4, keywords_json),
                    public = COALESCE(?5, public),
                    what = COALESCE(?6, what)
                 WHERE id = ?1",
                rusqlite::params![
                    row_id,
                    update.title,
                    update.description,
                    keywords_json,
                    update.public,
                    update.what.map(|what| what.as_str()),
                ],
            )
            .map_err(StoreError::from)?;
        if updated == 0 {
            return Err(BackendError::NotFound(id.clone()));
        }
        Ok(())
    }
}

/// Ids are row ids; anything else cannot exist in this store.
fn parse_id(id: &ActivityId) -> Result<i64, BackendError> {
    id.as_str()
        .parse()
        .map_err(|_| BackendError::NotFound(id.clone()))
}

/// Fixed-width RFC 3339 so text order is time order.
fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(column: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
