//! Indexed transactional engine (preferred tier)
//!
//! Workspaces live in SQLite. Each workspace write is a single transaction,
//! so a failed write never leaves a half-replaced workspace behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::{Connection, OptionalExtension};

use crate::backend::{BackendStatus, StorageBackend, StorageLocation};
use crate::database::Database;
use crate::error::StorageError;
use crate::workspace::{validate_workspace_name, MigrationRecord, Workspace, WorkspaceMeta};
use crate::Result;

pub const INDEXED_BACKEND_NAME: &str = "indexed";

pub struct IndexedBackend {
    location: StorageLocation,
    db: RwLock<Option<Database>>,
    status: BackendStatus,
}

impl IndexedBackend {
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            db: RwLock::new(None),
            status: BackendStatus::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageLocation::InMemory)
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    fn database(&self) -> Result<Database> {
        self.db
            .read()
            .clone()
            .ok_or_else(|| self.status.unavailable(INDEXED_BACKEND_NAME))
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn load_metas(conn: &Connection) -> Result<Vec<WorkspaceMeta>> {
    let mut stmt = conn.prepare(
        "SELECT w.name, w.created_at, w.updated_at,
                COALESCE(SUM(CASE WHEN e.kind = 'file' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN e.kind = 'dir' THEN 1 ELSE 0 END), 0)
         FROM workspaces w
         LEFT JOIN entries e ON e.workspace = w.name
         GROUP BY w.name
         ORDER BY w.name",
    )?;

    let metas = stmt
        .query_map([], |row| {
            let created_str: String = row.get(1)?;
            let updated_str: String = row.get(2)?;
            Ok(WorkspaceMeta {
                name: row.get(0)?,
                file_count: row.get::<_, i64>(3)? as usize,
                directory_count: row.get::<_, i64>(4)? as usize,
                created_at: parse_timestamp(&created_str),
                updated_at: parse_timestamp(&updated_str),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(metas)
}

fn load_workspace(conn: &Connection, name: &str) -> Result<Workspace> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT created_at, updated_at FROM workspaces WHERE name = ?1",
            [name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (created_str, updated_str) =
        row.ok_or_else(|| StorageError::WorkspaceNotFound(name.to_string()))?;

    let mut workspace = Workspace::new(name);
    workspace.created_at = parse_timestamp(&created_str);
    workspace.updated_at = parse_timestamp(&updated_str);

    let mut stmt =
        conn.prepare("SELECT path, kind, content FROM entries WHERE workspace = ?1")?;
    let rows = stmt.query_map([name], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<Vec<u8>>>(2)?,
        ))
    })?;

    for row in rows {
        let (path, kind, content) = row?;
        match kind.as_str() {
            "dir" => {
                workspace.directories.insert(path);
            }
            "file" => {
                workspace.files.insert(path, content.unwrap_or_default());
            }
            other => {
                return Err(StorageError::Corrupt {
                    key: format!("{}/{}", name, path),
                    reason: format!("unknown entry kind {:?}", other),
                })
            }
        }
    }

    Ok(workspace)
}

fn store_workspace(conn: &Connection, workspace: &Workspace) -> Result<()> {
    let now = Utc::now();
    let existing_created: Option<String> = conn
        .query_row(
            "SELECT created_at FROM workspaces WHERE name = ?1",
            [&workspace.name],
            |row| row.get(0),
        )
        .optional()?;

    let created_at = workspace
        .created_at
        .map(|dt| dt.to_rfc3339())
        .or(existing_created)
        .unwrap_or_else(|| now.to_rfc3339());
    let updated_at = workspace.updated_at.unwrap_or(now).to_rfc3339();

    conn.execute(
        "INSERT OR REPLACE INTO workspaces (name, created_at, updated_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![workspace.name, created_at, updated_at],
    )?;
    conn.execute("DELETE FROM entries WHERE workspace = ?1", [&workspace.name])?;

    let mut insert = conn.prepare(
        "INSERT INTO entries (workspace, path, kind, content) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for dir in &workspace.directories {
        insert.execute(rusqlite::params![
            workspace.name,
            dir,
            "dir",
            Option::<Vec<u8>>::None
        ])?;
    }
    for (path, content) in &workspace.files {
        insert.execute(rusqlite::params![workspace.name, path, "file", content])?;
    }

    Ok(())
}

#[async_trait]
impl StorageBackend for IndexedBackend {
    fn name(&self) -> &str {
        INDEXED_BACKEND_NAME
    }

    fn loaded(&self) -> bool {
        self.status.loaded()
    }

    fn has_workspaces(&self) -> bool {
        self.status.has_workspaces()
    }

    async fn probe(&self) -> Result<bool> {
        if self.status.loaded() {
            return Ok(true);
        }

        match Database::open_location(&self.location) {
            Ok(db) => {
                *self.db.write() = Some(db);
                self.status.set_loaded(true);
                tracing::debug!(backend = INDEXED_BACKEND_NAME, "Probe succeeded");
                Ok(true)
            }
            Err(e) => {
                let e = self.status.set_unsupported(e);
                tracing::warn!(
                    backend = INDEXED_BACKEND_NAME,
                    error = %e,
                    "Indexed storage unavailable"
                );
                Ok(false)
            }
        }
    }

    async fn check_workspaces(&self) -> Result<()> {
        let db = self.database()?;
        let metas = db.with_connection(load_metas)?;
        let has_workspaces = metas.iter().any(|m| !m.is_empty());
        self.status.set_has_workspaces(has_workspaces);

        tracing::debug!(
            backend = INDEXED_BACKEND_NAME,
            workspace_count = metas.len(),
            has_workspaces,
            "Checked workspaces"
        );
        Ok(())
    }

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceMeta>> {
        let db = self.database()?;
        db.with_connection(load_metas)
            .map_err(|e| StorageError::read_failure("*", e))
    }

    async fn read_workspace(&self, name: &str) -> Result<Workspace> {
        validate_workspace_name(name)?;
        let db = self.database()?;
        db.with_connection(|conn| load_workspace(conn, name))
            .map_err(|e| StorageError::read_failure(name, e))
    }

    async fn write_workspace(&self, workspace: &Workspace) -> Result<()> {
        workspace.validate()?;
        let db = self.database()?;
        db.transaction(|conn| store_workspace(conn, workspace))
            .map_err(|e| StorageError::write_failure(&workspace.name, e))?;

        tracing::debug!(
            backend = INDEXED_BACKEND_NAME,
            workspace = %workspace.name,
            files = workspace.files.len(),
            "Wrote workspace"
        );
        Ok(())
    }

    async fn delete_workspace(&self, name: &str) -> Result<()> {
        validate_workspace_name(name)?;
        let db = self.database()?;
        let removed = db
            .with_connection(|conn| {
                Ok(conn.execute("DELETE FROM workspaces WHERE name = ?1", [name])?)
            })
            .map_err(|e| StorageError::write_failure(name, e))?;

        if removed == 0 {
            return Err(StorageError::WorkspaceNotFound(name.to_string()));
        }

        tracing::info!(backend = INDEXED_BACKEND_NAME, workspace = %name, "Deleted workspace");
        Ok(())
    }

    async fn migration_record(&self, source: &str) -> Result<Option<MigrationRecord>> {
        let db = self.database()?;
        db.with_connection(|conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT destination, completed_at, workspaces
                     FROM migration_records WHERE source = ?1",
                    [source],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            match row {
                Some((destination, completed_str, workspaces_json)) => {
                    let completed_at = parse_timestamp(&completed_str).ok_or_else(|| {
                        StorageError::Corrupt {
                            key: format!("migration_records/{}", source),
                            reason: format!("bad timestamp {:?}", completed_str),
                        }
                    })?;
                    Ok(Some(MigrationRecord {
                        source: source.to_string(),
                        destination,
                        completed_at,
                        workspaces: serde_json::from_str(&workspaces_json)?,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    async fn write_migration_record(&self, record: &MigrationRecord) -> Result<()> {
        let db = self.database()?;
        let workspaces_json = serde_json::to_string(&record.workspaces)?;
        db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO migration_records
                 (source, destination, completed_at, workspaces)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.source,
                    record.destination,
                    record.completed_at.to_rfc3339(),
                    workspaces_json,
                ],
            )?;
            Ok(())
        })
    }
}
