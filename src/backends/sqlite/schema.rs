//! SQLite schema definitions.

use rusqlite::Connection;

use crate::error::{BackendError, RegistryError, RegistryResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

fn schema_error(message: String) -> RegistryError {
    RegistryError::Backend(BackendError::Schema { message })
}

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> RegistryResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::info!(version = SCHEMA_VERSION, "initialized registry schema");
    } else if current_version > SCHEMA_VERSION {
        return Err(schema_error(format!(
            "database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Get the current schema version (0 for a fresh database).
fn get_schema_version(conn: &Connection) -> RegistryResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| schema_error(format!("failed to create schema_version table: {}", e)))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> RegistryResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| schema_error(format!("failed to clear schema_version: {}", e)))?;

    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )
    .map_err(|e| schema_error(format!("failed to set schema_version: {}", e)))?;

    Ok(())
}

/// Create the initial schema (version 1).
///
/// Every version row of every kind lives in one `records` table; the chain
/// for an external id is the set of rows sharing it. The uniqueness
/// constraint on `(resource_type, external_id, version)` is the backstop for
/// concurrent writers racing on the same chain.
fn create_schema_v1(conn: &Connection) -> RegistryResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            internal_id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_type TEXT NOT NULL,
            external_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            latest INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            payload TEXT,
            envelope_meta TEXT NOT NULL,
            natural_key TEXT,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            UNIQUE (resource_type, external_id, version)
        )",
        [],
    )
    .map_err(|e| schema_error(format!("failed to create records table: {}", e)))?;

    create_indexes(conn)
}

/// Create indexes for efficient queries.
fn create_indexes(conn: &Connection) -> RegistryResult<()> {
    let indexes = [
        // Current-view lookups (get_current, latest-only find)
        "CREATE INDEX IF NOT EXISTS idx_records_current
         ON records(resource_type, external_id) WHERE latest = 1 AND deleted = 0",
        // Natural-key uniqueness over the current view only; old versions and
        // tombstones keep the key without blocking reuse
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_natural_key
         ON records(resource_type, natural_key) WHERE latest = 1 AND deleted = 0 AND natural_key IS NOT NULL",
        // History ordering and since-filter scans
        "CREATE INDEX IF NOT EXISTS idx_records_modified
         ON records(resource_type, modified_at)",
    ];

    for index_sql in &indexes {
        conn.execute(index_sql, [])
            .map_err(|e| schema_error(format!("failed to create index: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(initialize_schema(&conn).is_err());
    }

    #[test]
    fn test_version_uniqueness_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let insert = "INSERT INTO records
            (resource_type, external_id, version, latest, deleted, payload, envelope_meta, created_at, modified_at)
            VALUES ('Organization', 'org-1', 1, 1, 0, '{}', '{}', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
