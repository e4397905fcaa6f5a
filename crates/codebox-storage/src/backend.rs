//! Storage backend contract
//!
//! Every engine implements the same capability surface. Probing is kept
//! apart from data access so a registry can decide between engines before
//! committing to one, and so an engine that fails probing never sees
//! another call.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;

use crate::error::StorageError;
use crate::workspace::{MigrationRecord, Workspace, WorkspaceMeta};
use crate::Result;

/// Where an engine keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    InMemory,
    Path(PathBuf),
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stable identifier, e.g. `"indexed"` or `"keyvalue"`
    fn name(&self) -> &str;

    /// Probing completed and the engine is usable
    fn loaded(&self) -> bool;

    /// At least one non-empty workspace exists; meaningful once `loaded`
    fn has_workspaces(&self) -> bool;

    /// Initialize the engine. An unsupported environment is `Ok(false)`.
    async fn probe(&self) -> Result<bool>;

    /// Scan persisted data and refresh `has_workspaces`.
    async fn check_workspaces(&self) -> Result<()>;

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceMeta>>;

    async fn read_workspace(&self, name: &str) -> Result<Workspace>;

    /// Replace the named workspace with `workspace`. Atomic per workspace.
    async fn write_workspace(&self, workspace: &Workspace) -> Result<()>;

    async fn delete_workspace(&self, name: &str) -> Result<()>;

    async fn migration_record(&self, source: &str) -> Result<Option<MigrationRecord>>;

    async fn write_migration_record(&self, record: &MigrationRecord) -> Result<()>;
}

/// Probe/scan flags shared by the engine implementations.
#[derive(Debug, Default)]
pub(crate) struct BackendStatus {
    inner: RwLock<StatusFlags>,
    unsupported: RwLock<Option<String>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct StatusFlags {
    loaded: bool,
    has_workspaces: bool,
}

impl BackendStatus {
    pub(crate) fn loaded(&self) -> bool {
        self.inner.read().loaded
    }

    pub(crate) fn has_workspaces(&self) -> bool {
        let flags = *self.inner.read();
        flags.loaded && flags.has_workspaces
    }

    pub(crate) fn set_loaded(&self, loaded: bool) {
        self.inner.write().loaded = loaded;
    }

    pub(crate) fn set_has_workspaces(&self, has_workspaces: bool) {
        self.inner.write().has_workspaces = has_workspaces;
    }

    /// Record a failed probe and return the error callers will see.
    pub(crate) fn set_unsupported(&self, reason: impl std::fmt::Display) -> StorageError {
        let reason = reason.to_string();
        *self.unsupported.write() = Some(reason.clone());
        StorageError::Unsupported(reason)
    }

    /// Error for data access before a successful probe.
    pub(crate) fn unavailable(&self, backend: &str) -> StorageError {
        match self.unsupported.read().as_ref() {
            Some(reason) => StorageError::Unsupported(reason.clone()),
            None => StorageError::NotLoaded(backend.to_string()),
        }
    }
}
