//! Runtime settings repository: flat key/value overrides.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Returns every stored override. Keys with a NULL value are included as `None`.
pub fn all(db: &Database) -> Result<HashMap<String, Option<String>>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT key, value FROM runtime_settings")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    })
}

/// Returns a single override. A missing key and a NULL value both yield `None`.
pub fn get(db: &Database, key: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let value: Option<Option<String>> = conn
            .query_row(
                "SELECT value FROM runtime_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    })
}

/// Inserts or replaces one override.
pub fn upsert(db: &Database, key: &str, value: Option<&str>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO runtime_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    })
}

/// Applies several overrides in one transaction.
pub fn bulk_update(db: &Database, entries: &[(&str, Option<String>)]) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "INSERT INTO runtime_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        for (key, value) in entries {
            stmt.execute(params![key, value])?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_key() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(get(&db, "storage_root").unwrap(), None);
    }

    #[test]
    fn test_upsert_replaces() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, "storage_root", Some("/a")).unwrap();
        upsert(&db, "storage_root", Some("/b")).unwrap();
        assert_eq!(get(&db, "storage_root").unwrap().as_deref(), Some("/b"));

        upsert(&db, "storage_root", None).unwrap();
        assert_eq!(get(&db, "storage_root").unwrap(), None);
    }

    #[test]
    fn test_bulk_update_and_all() {
        let db = Database::open_in_memory().unwrap();
        bulk_update(
            &db,
            &[
                ("storage_root", Some("/srv".to_string())),
                ("job_timeout_seconds", Some("60".to_string())),
                ("gallery_dl_extra_args", None),
            ],
        )
        .unwrap();

        let map = all(&db).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["job_timeout_seconds"].as_deref(), Some("60"));
        assert_eq!(map["gallery_dl_extra_args"], None);
    }
}
