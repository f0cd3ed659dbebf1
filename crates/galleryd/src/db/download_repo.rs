//! Download repository: CRUD operations for the `downloads`,
//! `download_items` and `download_urls` tables.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use uuid::Uuid;

use super::{Database, DatabaseError};
use crate::jobs::model::{Download, DownloadItem, DownloadStatus, NewDownload, NewItem, StatusUpdate};

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, column: &'static str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            column,
            reason: format!("'{}': {}", s, e),
        })
}

fn parse_optional_timestamp(
    s: Option<&str>,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(|s| parse_timestamp(s, column)).transpose()
}

fn parse_uuid(s: &str, column: &'static str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Corrupt {
        column,
        reason: format!("'{}': {}", s, e),
    })
}

// ─── Rows ───────────────────────────────────────────────────────────────────

/// A raw download row from the database.
#[derive(Debug, Clone)]
struct DownloadRow {
    id: String,
    status: String,
    urls: String,
    label: Option<String>,
    post_title: Option<String>,
    output_path: Option<String>,
    requested_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    failure_reason: Option<String>,
}

impl DownloadRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            urls: row.get("urls")?,
            label: row.get("label")?,
            post_title: row.get("post_title")?,
            output_path: row.get("output_path")?,
            requested_at: row.get("requested_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            failure_reason: row.get("failure_reason")?,
        })
    }

    fn into_download(self, items: Vec<DownloadItem>) -> Result<Download, DatabaseError> {
        let status = self
            .status
            .parse::<DownloadStatus>()
            .map_err(|e| DatabaseError::Corrupt {
                column: "status",
                reason: e.to_string(),
            })?;
        let urls: Vec<String> =
            serde_json::from_str(&self.urls).map_err(|e| DatabaseError::Corrupt {
                column: "urls",
                reason: e.to_string(),
            })?;

        Ok(Download {
            id: parse_uuid(&self.id, "id")?,
            status,
            urls,
            label: self.label,
            post_title: self.post_title,
            output_path: self.output_path,
            requested_at: parse_timestamp(&self.requested_at, "requested_at")?,
            started_at: parse_optional_timestamp(self.started_at.as_deref(), "started_at")?,
            finished_at: parse_optional_timestamp(self.finished_at.as_deref(), "finished_at")?,
            failure_reason: self.failure_reason,
            items,
        })
    }
}

/// A raw item row from the database.
#[derive(Debug, Clone)]
struct ItemRow {
    id: String,
    download_id: String,
    filename: String,
    relative_path: String,
    file_size: Option<i64>,
    content_type: Option<String>,
    created_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            download_id: row.get("download_id")?,
            filename: row.get("filename")?,
            relative_path: row.get("relative_path")?,
            file_size: row.get("file_size")?,
            content_type: row.get("content_type")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_item(self) -> Result<DownloadItem, DatabaseError> {
        Ok(DownloadItem {
            id: parse_uuid(&self.id, "download_items.id")?,
            download_id: parse_uuid(&self.download_id, "download_id")?,
            filename: self.filename,
            relative_path: self.relative_path,
            file_size: self.file_size.and_then(|s| u64::try_from(s).ok()),
            content_type: self.content_type,
            created_at: parse_timestamp(&self.created_at, "download_items.created_at")?,
        })
    }
}

// ─── Connection-level building blocks ──────────────────────────────────────

fn load(conn: &Connection, id: &str) -> Result<Option<Download>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM downloads WHERE id = ?1",
            params![id],
            DownloadRow::from_row,
        )
        .optional()?;

    match row {
        Some(row) => {
            let items = load_items(conn, id)?;
            Ok(Some(row.into_download(items)?))
        }
        None => Ok(None),
    }
}

fn load_items(conn: &Connection, download_id: &str) -> Result<Vec<DownloadItem>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM download_items WHERE download_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map(params![download_id], ItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(ItemRow::into_item).collect()
}

fn insert_items(conn: &Connection, download_id: &str, items: &[NewItem]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO download_items (id, download_id, filename, relative_path, file_size,
         content_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for item in items {
        stmt.execute(params![
            Uuid::new_v4().to_string(),
            download_id,
            item.filename,
            item.relative_path,
            item.file_size.and_then(|s| i64::try_from(s).ok()),
            item.content_type,
            format_timestamp(item.created_at),
        ])?;
    }
    Ok(())
}

/// `?start, ?start+1, ...` for an `IN (...)` list of `count` values.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn exists(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM downloads WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Which side of the active/failed split a URL lookup should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlMatch {
    Active,
    Failed,
}

fn find_by_urls(db: &Database, urls: &[String], which: UrlMatch) -> Result<Option<Download>, DatabaseError> {
    let sql = match which {
        UrlMatch::Active => {
            "SELECT d.id FROM downloads d JOIN download_urls u ON u.download_id = d.id
             WHERE u.url = ?1 AND d.status != ?2 LIMIT 1"
        }
        UrlMatch::Failed => {
            "SELECT d.id FROM downloads d JOIN download_urls u ON u.download_id = d.id
             WHERE u.url = ?1 AND d.status = ?2 LIMIT 1"
        }
    };

    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        for url in urls {
            let id: Option<String> = stmt
                .query_row(params![url, DownloadStatus::Failed.as_str()], |r| r.get(0))
                .optional()?;
            if let Some(id) = id {
                return load(conn, &id);
            }
        }
        Ok(None)
    })
}

// ─── Public operations ─────────────────────────────────────────────────────

/// Inserts a queued download together with its URL index rows.
///
/// Both are written in one transaction. A URL already owned by another
/// job surfaces as a UNIQUE violation (see [`DatabaseError::is_unique_violation`])
/// and nothing is written.
pub fn insert(db: &Database, new: &NewDownload) -> Result<Download, DatabaseError> {
    let id = new.id.to_string();
    let urls_json = serde_json::to_string(&new.urls).map_err(|e| DatabaseError::Corrupt {
        column: "urls",
        reason: e.to_string(),
    })?;

    db.with_tx(|tx| {
        tx.execute(
            "INSERT INTO downloads (id, status, urls, label, post_title, requested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                DownloadStatus::Queued.as_str(),
                urls_json,
                new.label,
                new.post_title,
                format_timestamp(new.requested_at),
            ],
        )?;

        let mut stmt = tx.prepare("INSERT INTO download_urls (download_id, url) VALUES (?1, ?2)")?;
        for url in &new.urls {
            stmt.execute(params![id, url]).map_err(|e| {
                let err = DatabaseError::from(e);
                if err.is_unique_violation() {
                    DatabaseError::Duplicate {
                        column: "download_urls.url",
                        value: url.clone(),
                    }
                } else {
                    err
                }
            })?;
        }
        drop(stmt);

        load(tx, &id)?.ok_or_else(|| DatabaseError::Corrupt {
            column: "id",
            reason: format!("download {} vanished after insert", id),
        })
    })
}

/// Finds a download by its ID, items included.
pub fn find_by_id(db: &Database, id: &Uuid) -> Result<Option<Download>, DatabaseError> {
    db.with_conn(|conn| load(conn, &id.to_string()))
}

/// All downloads, newest request first.
pub fn list(db: &Database) -> Result<Vec<Download>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM downloads ORDER BY requested_at DESC, rowid DESC")?;
        let rows: Vec<DownloadRow> = stmt
            .query_map([], DownloadRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let items = load_items(conn, &row.id)?;
                row.into_download(items)
            })
            .collect()
    })
}

/// First non-failed download owning one of `urls`, checked in input order.
pub fn find_active_by_urls(db: &Database, urls: &[String]) -> Result<Option<Download>, DatabaseError> {
    find_by_urls(db, urls, UrlMatch::Active)
}

/// First failed download owning one of `urls`, checked in input order.
pub fn find_failed_by_urls(db: &Database, urls: &[String]) -> Result<Option<Download>, DatabaseError> {
    find_by_urls(db, urls, UrlMatch::Failed)
}

/// Deletes a download; items and URL rows cascade. Returns whether a row
/// was removed.
pub fn delete(db: &Database, id: &Uuid) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM downloads WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    })
}

/// Deletes a download only while its status is one of `statuses`.
pub fn delete_when(db: &Database, id: &Uuid, statuses: &[DownloadStatus]) -> Result<bool, DatabaseError> {
    let id = id.to_string();
    let names: Vec<&'static str> = statuses.iter().map(DownloadStatus::as_str).collect();
    let sql = format!(
        "DELETE FROM downloads WHERE id = ?1 AND status IN ({})",
        placeholders(2, names.len())
    );

    let mut values: Vec<&dyn ToSql> = vec![&id];
    values.extend(names.iter().map(|n| n as &dyn ToSql));

    db.with_conn(|conn| {
        let affected = conn.execute(&sql, values.as_slice())?;
        Ok(affected > 0)
    })
}

/// Sets the status. `failure_reason` is always overwritten; the other
/// columns only when provided.
pub fn update_status(
    db: &Database,
    id: &Uuid,
    status: DownloadStatus,
    update: &StatusUpdate,
) -> Result<Option<Download>, DatabaseError> {
    set_status(db, id, None, status, update)
}

/// [`update_status`] guarded by the current status: nothing changes unless
/// the download is in one of `from`. `None` covers both a missing download
/// and one in another state.
pub fn transition(
    db: &Database,
    id: &Uuid,
    from: &[DownloadStatus],
    to: DownloadStatus,
    update: &StatusUpdate,
) -> Result<Option<Download>, DatabaseError> {
    set_status(db, id, Some(from), to, update)
}

fn set_status(
    db: &Database,
    id: &Uuid,
    from: Option<&[DownloadStatus]>,
    status: DownloadStatus,
    update: &StatusUpdate,
) -> Result<Option<Download>, DatabaseError> {
    let id = id.to_string();
    let status = status.as_str();
    let started_at = update.started_at.map(format_timestamp);
    let finished_at = update.finished_at.map(format_timestamp);
    let guard: Vec<&'static str> = from
        .unwrap_or_default()
        .iter()
        .map(DownloadStatus::as_str)
        .collect();

    let mut sql = String::from(
        "UPDATE downloads SET status = ?2,
           started_at = COALESCE(?3, started_at),
           finished_at = COALESCE(?4, finished_at),
           failure_reason = ?5,
           output_path = COALESCE(?6, output_path)
         WHERE id = ?1",
    );
    if from.is_some() {
        sql.push_str(&format!(" AND status IN ({})", placeholders(7, guard.len())));
    }

    let mut values: Vec<&dyn ToSql> = vec![
        &id,
        &status,
        &started_at,
        &finished_at,
        &update.failure_reason,
        &update.output_path,
    ];
    values.extend(guard.iter().map(|n| n as &dyn ToSql));

    db.with_conn(|conn| {
        let affected = conn.execute(&sql, values.as_slice())?;
        if affected == 0 {
            return Ok(None);
        }
        load(conn, &id)
    })
}

/// Appends produced files to a download.
pub fn append_items(db: &Database, id: &Uuid, items: &[NewItem]) -> Result<Option<Download>, DatabaseError> {
    let id = id.to_string();
    db.with_tx(|tx| {
        if !exists(tx, &id)? {
            return Ok(None);
        }
        insert_items(tx, &id, items)?;
        load(tx, &id)
    })
}

/// Replaces the item set and marks the download succeeded, in one
/// transaction, so a reader never sees `succeeded` without its items.
pub fn complete(
    db: &Database,
    id: &Uuid,
    items: &[NewItem],
    finished_at: DateTime<Utc>,
    output_path: &str,
) -> Result<Option<Download>, DatabaseError> {
    let id = id.to_string();
    db.with_tx(|tx| {
        if !exists(tx, &id)? {
            return Ok(None);
        }
        tx.execute("DELETE FROM download_items WHERE download_id = ?1", params![id])?;
        insert_items(tx, &id, items)?;
        tx.execute(
            "UPDATE downloads SET status = ?2, finished_at = ?3, failure_reason = NULL,
             output_path = ?4 WHERE id = ?1",
            params![
                id,
                DownloadStatus::Succeeded.as_str(),
                format_timestamp(finished_at),
                output_path,
            ],
        )?;
        load(tx, &id)
    })
}

/// Puts a finished download back into the queue. Timestamps and the
/// failure reason are cleared; items from the previous run are kept.
///
/// Only a `succeeded` or `failed` download is reset; `None` otherwise.
pub fn reset_for_retry(
    db: &Database,
    id: &Uuid,
    requested_at: DateTime<Utc>,
) -> Result<Option<Download>, DatabaseError> {
    let id = id.to_string();
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE downloads SET status = ?2, requested_at = ?3, started_at = NULL,
             finished_at = NULL, failure_reason = NULL
             WHERE id = ?1 AND status IN (?4, ?5)",
            params![
                id,
                DownloadStatus::Queued.as_str(),
                format_timestamp(requested_at),
                DownloadStatus::Succeeded.as_str(),
                DownloadStatus::Failed.as_str(),
            ],
        )?;
        if affected == 0 {
            return Ok(None);
        }
        load(conn, &id)
    })
}

/// Sets the post title of a download.
pub fn set_post_title(db: &Database, id: &Uuid, post_title: &str) -> Result<Option<Download>, DatabaseError> {
    let id = id.to_string();
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE downloads SET post_title = ?2 WHERE id = ?1",
            params![id, post_title],
        )?;
        if affected == 0 {
            return Ok(None);
        }
        load(conn, &id)
    })
}
