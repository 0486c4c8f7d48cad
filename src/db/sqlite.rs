//! SQLite backend implementation.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

use super::backend::StorageBackend;
use super::schema::SCHEMA;
use super::{
    from_db_timestamp, to_db_timestamp, AiFinding, AiStatus, Inspection, InspectionType, Photo,
    QueueItem,
};
use crate::error::{StoreError, StoreResult};

pub struct SqliteDb {
    pub(crate) conn: Connection,
}

impl SqliteDb {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(Self { conn })
    }

    /// Private in-memory SQLite database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self { conn })
    }

    fn configure(conn: &Connection) -> StoreResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    }
}

const INSPECTION_COLUMNS: &str = "id, address, inspector_name, client_name, inspection_type, \
     created_at, updated_at, photo_ids, completed";

const PHOTO_COLUMNS: &str = "id, inspection_id, room, captured_at, notes, thumbnail, full_image, \
     ai_status, ai_result, revision";

const QUEUE_COLUMNS: &str =
    "id, photo_id, revision, edit_timestamp, payload, created_at, retries, last_retry_at";

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    from_db_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => from_db_timestamp(&raw)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

/// Revisions are stored in a signed INTEGER column.
fn revision_to_sql(revision: u64) -> StoreResult<i64> {
    i64::try_from(revision).map_err(|_| {
        StoreError::StorageFailure(format!("revision {} does not fit in the database", revision))
    })
}

fn revision_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {0} value: {1}")]
struct UnknownVariant(&'static str, String);

fn row_to_inspection(row: &Row<'_>) -> rusqlite::Result<Inspection> {
    let type_str: String = row.get(4)?;
    let inspection_type = InspectionType::from_str(&type_str)
        .ok_or_else(|| conversion_error(4, UnknownVariant("inspection type", type_str)))?;
    let photo_ids_json: String = row.get(7)?;
    let photo_ids: Vec<String> =
        serde_json::from_str(&photo_ids_json).map_err(|e| conversion_error(7, e))?;

    Ok(Inspection {
        id: row.get(0)?,
        address: row.get(1)?,
        inspector_name: row.get(2)?,
        client_name: row.get(3)?,
        inspection_type,
        created_at: timestamp_column(row, 5)?,
        updated_at: timestamp_column(row, 6)?,
        photo_ids,
        completed: row.get(8)?,
    })
}

fn row_to_photo(row: &Row<'_>) -> rusqlite::Result<Photo> {
    let status_str: String = row.get(7)?;
    let ai_status = AiStatus::from_str(&status_str)
        .ok_or_else(|| conversion_error(7, UnknownVariant("ai status", status_str)))?;
    let ai_result: Option<AiFinding> = match row.get::<_, Option<String>>(8)? {
        Some(json) => Some(serde_json::from_str(&json).map_err(|e| conversion_error(8, e))?),
        None => None,
    };

    Ok(Photo {
        id: row.get(0)?,
        inspection_id: row.get(1)?,
        room: row.get(2)?,
        captured_at: timestamp_column(row, 3)?,
        notes: row.get(4)?,
        thumbnail: row.get(5)?,
        full_image: row.get(6)?,
        ai_status,
        ai_result,
        revision: revision_column(row, 9)?,
    })
}

fn row_to_queue_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        revision: revision_column(row, 2)?,
        edit_timestamp: timestamp_column(row, 3)?,
        payload: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
        retries: row.get(6)?,
        last_retry_at: optional_timestamp_column(row, 7)?,
    })
}

impl StorageBackend for SqliteDb {
    fn initialize(&mut self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ========================================================================
    // Inspections
    // ========================================================================

    fn put_inspection(&mut self, inspection: &Inspection) -> StoreResult<()> {
        let photo_ids = serde_json::to_string(&inspection.photo_ids)?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO inspections
                (id, address, inspector_name, client_name, inspection_type,
                 created_at, updated_at, photo_ids, completed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                inspection.id,
                inspection.address,
                inspection.inspector_name,
                inspection.client_name,
                inspection.inspection_type.as_str(),
                to_db_timestamp(&inspection.created_at),
                to_db_timestamp(&inspection.updated_at),
                photo_ids,
                inspection.completed,
            ],
        )?;
        Ok(())
    }

    fn get_inspection(&self, id: &str) -> StoreResult<Option<Inspection>> {
        let sql = format!("SELECT {} FROM inspections WHERE id = ?", INSPECTION_COLUMNS);
        let inspection = self
            .conn
            .query_row(&sql, [id], row_to_inspection)
            .optional()?;
        Ok(inspection)
    }

    fn most_recent_inspection(&self) -> StoreResult<Option<Inspection>> {
        let sql = format!(
            "SELECT {} FROM inspections ORDER BY created_at DESC, id DESC LIMIT 1",
            INSPECTION_COLUMNS
        );
        let inspection = self
            .conn
            .query_row(&sql, [], row_to_inspection)
            .optional()?;
        Ok(inspection)
    }

    fn list_inspections(&self) -> StoreResult<Vec<Inspection>> {
        let sql = format!(
            "SELECT {} FROM inspections ORDER BY created_at DESC, id DESC",
            INSPECTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let inspections = stmt
            .query_map([], row_to_inspection)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(inspections)
    }

    // ========================================================================
    // Photos
    // ========================================================================

    fn put_photo(&mut self, photo: &Photo) -> StoreResult<()> {
        let ai_result = photo
            .ai_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let revision = revision_to_sql(photo.revision)?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO photos
                (id, inspection_id, room, captured_at, notes, thumbnail, full_image,
                 ai_status, ai_result, revision)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                photo.id,
                photo.inspection_id,
                photo.room,
                to_db_timestamp(&photo.captured_at),
                photo.notes,
                photo.thumbnail,
                photo.full_image,
                photo.ai_status.as_str(),
                ai_result,
                revision,
            ],
        )?;
        Ok(())
    }

    fn get_photo(&self, id: &str) -> StoreResult<Option<Photo>> {
        let sql = format!("SELECT {} FROM photos WHERE id = ?", PHOTO_COLUMNS);
        let photo = self.conn.query_row(&sql, [id], row_to_photo).optional()?;
        Ok(photo)
    }

    fn delete_photo(&mut self, id: &str) -> StoreResult<bool> {
        let removed = self.conn.execute("DELETE FROM photos WHERE id = ?", [id])?;
        Ok(removed > 0)
    }

    fn photos_by_inspection(&self, inspection_id: &str) -> StoreResult<Vec<Photo>> {
        let sql = format!("SELECT {} FROM photos WHERE inspection_id = ?", PHOTO_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let photos = stmt
            .query_map([inspection_id], row_to_photo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    fn photo_owners(&self) -> StoreResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare("SELECT id, inspection_id FROM photos")?;
        let owners = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(owners)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put_setting(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    // ========================================================================
    // Sync queue
    // ========================================================================

    fn queue_insert(&mut self, item: &QueueItem) -> StoreResult<bool> {
        let revision = revision_to_sql(item.revision)?;
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO sync_queue
                (id, photo_id, revision, edit_timestamp, payload, created_at, retries, last_retry_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                item.id,
                item.photo_id,
                revision,
                to_db_timestamp(&item.edit_timestamp),
                item.payload,
                to_db_timestamp(&item.created_at),
                item.retries,
                item.last_retry_at.as_ref().map(to_db_timestamp),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn queue_get(&self, id: &str) -> StoreResult<Option<QueueItem>> {
        let sql = format!("SELECT {} FROM sync_queue WHERE id = ?", QUEUE_COLUMNS);
        let item = self.conn.query_row(&sql, [id], row_to_queue_item).optional()?;
        Ok(item)
    }

    fn queue_list(&self) -> StoreResult<Vec<QueueItem>> {
        let sql = format!(
            "SELECT {} FROM sync_queue ORDER BY created_at ASC, id ASC",
            QUEUE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map([], row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn queue_remove(&mut self, id: &str) -> StoreResult<bool> {
        let removed = self.conn.execute("DELETE FROM sync_queue WHERE id = ?", [id])?;
        Ok(removed > 0)
    }

    fn queue_record_retry(&mut self, id: &str, at: DateTime<Utc>) -> StoreResult<Option<u32>> {
        let retries = self
            .conn
            .query_row(
                r#"
                UPDATE sync_queue
                SET retries = retries + 1, last_retry_at = ?
                WHERE id = ?
                RETURNING retries
                "#,
                params![to_db_timestamp(&at), id],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(retries)
    }

    fn queue_len(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn queue_clear(&mut self) -> StoreResult<usize> {
        let removed = self.conn.execute("DELETE FROM sync_queue", [])?;
        Ok(removed)
    }
}
