//! Schema migrations for the indexed engine
//!
//! Tables: workspaces, entries, migration_records

use crate::Result;
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 1;

pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result: std::result::Result<i32, _> =
        conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        });

    match result {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(rusqlite::Error::SqliteFailure(_, _)) => {
            // Table doesn't exist yet
            conn.execute(
                "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
                [],
            )?;
            conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    tracing::info!("Running indexed schema migration v1");

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            name TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
    )?;

    // kind is 'file' or 'dir'; directories carry no content
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            workspace TEXT NOT NULL,
            path TEXT NOT NULL,
            kind TEXT NOT NULL,
            content BLOB,
            PRIMARY KEY (workspace, path),
            FOREIGN KEY (workspace) REFERENCES workspaces(name) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_entries_workspace ON entries(workspace);
    "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS migration_records (
            source TEXT PRIMARY KEY,
            destination TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            workspaces TEXT NOT NULL DEFAULT '[]'
        );
    "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert!(tables.contains(&"workspaces".to_string()));
        assert!(tables.contains(&"entries".to_string()));
        assert!(tables.contains(&"migration_records".to_string()));
    }
}
