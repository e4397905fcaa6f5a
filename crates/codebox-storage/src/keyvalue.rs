//! Simple key-value engine (legacy tier)
//!
//! A flat string map with a byte quota, in the style of browser local
//! storage. Keys:
//!
//! - `.workspaces/<ws>/`        workspace marker
//! - `.workspaces/<ws>/<dir>/`  directory marker
//! - `.workspaces/<ws>/<file>`  base64 file content
//! - `.migrations/<source>`     migration record (JSON)
//!
//! The engine has no notion of timestamps.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::{BackendStatus, StorageBackend, StorageLocation};
use crate::error::StorageError;
use crate::workspace::{validate_workspace_name, MigrationRecord, Workspace, WorkspaceMeta};
use crate::Result;

pub const KEY_VALUE_BACKEND_NAME: &str = "keyvalue";

/// Default quota, matching the common local storage limit.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

const WORKSPACES_PREFIX: &str = ".workspaces/";
const MIGRATIONS_PREFIX: &str = ".migrations/";

#[derive(Debug, Clone)]
enum KvOp {
    Set(String, String),
    Remove(String),
}

struct KvStore {
    entries: BTreeMap<String, String>,
    quota: usize,
    path: Option<PathBuf>,
}

impl KvStore {
    fn load(location: &StorageLocation, quota: usize) -> Result<Self> {
        let (entries, path) = match location {
            StorageLocation::InMemory => (BTreeMap::new(), None),
            StorageLocation::Path(path) => {
                let entries = if path.exists() {
                    let raw = std::fs::read_to_string(path)?;
                    serde_json::from_str(&raw)?
                } else {
                    BTreeMap::new()
                };
                (entries, Some(path.clone()))
            }
        };

        Ok(Self {
            entries,
            quota,
            path,
        })
    }

    fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a String, &'a String)> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    /// Apply a batch of operations all-or-nothing. The quota is checked
    /// against the final state before anything changes.
    fn apply(&mut self, ops: Vec<KvOp>) -> Result<()> {
        let mut next = self.entries.clone();
        for op in ops {
            match op {
                KvOp::Set(key, value) => {
                    next.insert(key, value);
                }
                KvOp::Remove(key) => {
                    next.remove(&key);
                }
            }
        }

        let required = Self::used_bytes(&next);
        if required > self.quota {
            return Err(StorageError::QuotaExceeded {
                required,
                quota: self.quota,
            });
        }

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        self.entries = next;
        Ok(())
    }
}

fn persist(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(entries)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn workspace_prefix(name: &str) -> String {
    format!("{}{}/", WORKSPACES_PREFIX, name)
}

/// Entries of a workspace, keyed by the part of the key after the prefix.
fn decode_workspace<'a>(
    name: &str,
    entries: impl Iterator<Item = (&'a String, &'a String)>,
    prefix_len: usize,
) -> Result<Workspace> {
    let mut workspace = Workspace::new(name);
    for (key, value) in entries {
        let rest = &key[prefix_len..];
        if rest.is_empty() {
            continue;
        }
        if let Some(dir) = rest.strip_suffix('/') {
            workspace.directories.insert(dir.to_string());
        } else {
            let content = STANDARD.decode(value).map_err(|e| StorageError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            workspace.files.insert(rest.to_string(), content);
        }
    }
    Ok(workspace)
}

pub struct KeyValueBackend {
    location: StorageLocation,
    quota: usize,
    store: RwLock<Option<KvStore>>,
    status: BackendStatus,
}

impl KeyValueBackend {
    pub fn new(location: StorageLocation) -> Self {
        Self::with_quota(location, DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(location: StorageLocation, quota: usize) -> Self {
        Self {
            location,
            quota,
            store: RwLock::new(None),
            status: BackendStatus::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageLocation::InMemory)
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Bytes currently used by keys and values
    pub fn used_bytes(&self) -> usize {
        self.store
            .read()
            .as_ref()
            .map(|s| KvStore::used_bytes(&s.entries))
            .unwrap_or(0)
    }

    fn with_store<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&KvStore) -> Result<T>,
    {
        let guard = self.store.read();
        match guard.as_ref() {
            Some(store) => f(store),
            None => Err(self.status.unavailable(KEY_VALUE_BACKEND_NAME)),
        }
    }

    fn with_store_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut KvStore) -> Result<T>,
    {
        let mut guard = self.store.write();
        match guard.as_mut() {
            Some(store) => f(store),
            None => Err(self.status.unavailable(KEY_VALUE_BACKEND_NAME)),
        }
    }

    /// Load the store and rewrite it unchanged. Writability is what the
    /// probe checks; a store at its quota is still usable.
    fn open_store(&self) -> Result<KvStore> {
        let store = KvStore::load(&self.location, self.quota)?;
        if let Some(path) = &store.path {
            persist(path, &store.entries)?;
        }
        Ok(store)
    }

    fn collect_metas(store: &KvStore) -> Vec<WorkspaceMeta> {
        let mut metas: BTreeMap<String, WorkspaceMeta> = BTreeMap::new();
        for (key, _) in store.with_prefix(WORKSPACES_PREFIX) {
            let rest = &key[WORKSPACES_PREFIX.len()..];
            let Some((name, entry)) = rest.split_once('/') else {
                continue;
            };
            let meta = metas.entry(name.to_string()).or_insert_with(|| WorkspaceMeta {
                name: name.to_string(),
                file_count: 0,
                directory_count: 0,
                created_at: None,
                updated_at: None,
            });
            if entry.is_empty() {
                continue;
            }
            if entry.ends_with('/') {
                meta.directory_count += 1;
            } else {
                meta.file_count += 1;
            }
        }
        metas.into_values().collect()
    }
}

#[async_trait]
impl StorageBackend for KeyValueBackend {
    fn name(&self) -> &str {
        KEY_VALUE_BACKEND_NAME
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

        match self.open_store() {
            Ok(store) => {
                *self.store.write() = Some(store);
                self.status.set_loaded(true);
                tracing::debug!(backend = KEY_VALUE_BACKEND_NAME, "Probe succeeded");
                Ok(true)
            }
            Err(e) => {
                let e = self.status.set_unsupported(e);
                tracing::warn!(
                    backend = KEY_VALUE_BACKEND_NAME,
                    error = %e,
                    "Key-value storage unavailable"
                );
                Ok(false)
            }
        }
    }

    async fn check_workspaces(&self) -> Result<()> {
        let metas = self.with_store(|store| Ok(Self::collect_metas(store)))?;
        let has_workspaces = metas.iter().any(|m| !m.is_empty());
        self.status.set_has_workspaces(has_workspaces);

        tracing::debug!(
            backend = KEY_VALUE_BACKEND_NAME,
            workspace_count = metas.len(),
            has_workspaces,
            "Checked workspaces"
        );
        Ok(())
    }

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceMeta>> {
        self.with_store(|store| Ok(Self::collect_metas(store)))
    }

    async fn read_workspace(&self, name: &str) -> Result<Workspace> {
        validate_workspace_name(name)?;
        let prefix = workspace_prefix(name);
        self.with_store(|store| {
            if store.with_prefix(&prefix).next().is_none() {
                return Err(StorageError::WorkspaceNotFound(name.to_string()));
            }
            decode_workspace(name, store.with_prefix(&prefix), prefix.len())
        })
        .map_err(|e| StorageError::read_failure(name, e))
    }

    async fn write_workspace(&self, workspace: &Workspace) -> Result<()> {
        workspace.validate()?;
        let prefix = workspace_prefix(&workspace.name);

        self.with_store_mut(|store| {
            let mut ops: Vec<KvOp> = store
                .with_prefix(&prefix)
                .map(|(k, _)| KvOp::Remove(k.clone()))
                .collect();

            ops.push(KvOp::Set(prefix.clone(), String::new()));
            for dir in &workspace.directories {
                ops.push(KvOp::Set(format!("{}{}/", prefix, dir), String::new()));
            }
            for (path, content) in &workspace.files {
                ops.push(KvOp::Set(format!("{}{}", prefix, path), STANDARD.encode(content)));
            }

            store.apply(ops)
        })
        .map_err(|e| StorageError::write_failure(&workspace.name, e))?;

        tracing::debug!(
            backend = KEY_VALUE_BACKEND_NAME,
            workspace = %workspace.name,
            files = workspace.files.len(),
            "Wrote workspace"
        );
        Ok(())
    }

    async fn delete_workspace(&self, name: &str) -> Result<()> {
        validate_workspace_name(name)?;
        let prefix = workspace_prefix(name);

        self.with_store_mut(|store| {
            let ops: Vec<KvOp> = store
                .with_prefix(&prefix)
                .map(|(k, _)| KvOp::Remove(k.clone()))
                .collect();
            if ops.is_empty() {
                return Err(StorageError::WorkspaceNotFound(name.to_string()));
            }
            store.apply(ops)
        })
        .map_err(|e| match e {
            e @ StorageError::WorkspaceNotFound(_) => e,
            other => StorageError::write_failure(name, other),
        })?;

        tracing::info!(backend = KEY_VALUE_BACKEND_NAME, workspace = %name, "Deleted workspace");
        Ok(())
    }

    async fn migration_record(&self, source: &str) -> Result<Option<MigrationRecord>> {
        let key = format!("{}{}", MIGRATIONS_PREFIX, source);
        self.with_store(|store| match store.get(&key) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        })
    }

    async fn write_migration_record(&self, record: &MigrationRecord) -> Result<()> {
        let key = format!("{}{}", MIGRATIONS_PREFIX, record.source);
        let value = serde_json::to_string(record)?;
        self.with_store_mut(|store| store.apply(vec![KvOp::Set(key, value)]))
    }
}
