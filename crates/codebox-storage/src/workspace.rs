//! Workspace data model
//!
//! A workspace is a named root directory of files. The same structure is
//! used by every backend, so data can move between engines unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StorageError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique name within a backend
    pub name: String,
    /// File contents keyed by workspace-relative path
    pub files: BTreeMap<String, Vec<u8>>,
    /// Explicit directories, including empty ones
    pub directories: BTreeSet<String>,
    /// Creation time, when the backend tracks it
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time, when the backend tracks it
    pub updated_at: Option<DateTime<Utc>>,
}

/// Listing entry returned by `StorageBackend::list_workspaces`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub name: String,
    pub file_count: usize,
    pub directory_count: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkspaceMeta {
    pub fn is_empty(&self) -> bool {
        self.file_count == 0 && self.directory_count == 0
    }
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: BTreeMap::new(),
            directories: BTreeSet::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Add a file, registering its parent directories.
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert_file(path, content);
        self
    }

    pub fn with_directory(mut self, path: impl Into<String>) -> Self {
        self.insert_directory(path);
        self
    }

    pub fn insert_file(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        let path = path.into();
        self.register_parents(&path);
        self.files.insert(path, content.into());
    }

    pub fn insert_directory(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.register_parents(&path);
        self.directories.insert(path);
    }

    fn register_parents(&mut self, path: &str) {
        let mut end = 0;
        while let Some(offset) = path[end..].find('/') {
            end += offset;
            self.directories.insert(path[..end].to_string());
            end += 1;
        }
    }

    /// Whether the workspace holds no files and no directories
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn meta(&self) -> WorkspaceMeta {
        WorkspaceMeta {
            name: self.name.clone(),
            file_count: self.files.len(),
            directory_count: self.directories.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Check the name and every path before the workspace reaches an engine.
    pub fn validate(&self) -> Result<()> {
        validate_workspace_name(&self.name)?;
        for path in self.directories.iter().chain(self.files.keys()) {
            validate_path(&self.name, path)?;
        }
        Ok(())
    }

    /// SHA-256 over directories, paths and contents. Timestamps are excluded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for dir in &self.directories {
            hasher.update(b"d");
            hasher.update((dir.len() as u64).to_le_bytes());
            hasher.update(dir.as_bytes());
        }
        for (path, content) in &self.files {
            hasher.update(b"f");
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(content);
        }

        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }

    /// Same directories, paths and bytes
    pub fn same_content(&self, other: &Workspace) -> bool {
        self.directories == other.directories && self.files == other.files
    }
}

/// Marker persisted in a destination backend once migration from `source`
/// has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub source: String,
    pub destination: String,
    pub completed_at: DateTime<Utc>,
    pub workspaces: Vec<String>,
}

impl MigrationRecord {
    pub fn new(source: &str, destination: &str, workspaces: Vec<String>) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            completed_at: Utc::now(),
            workspaces,
        }
    }
}

pub fn validate_workspace_name(name: &str) -> Result<()> {
    if name.trim().is_empty()
        || name.contains(['/', '\\', '\0'])
        || name == "."
        || name == ".."
    {
        return Err(StorageError::InvalidWorkspaceName(name.to_string()));
    }
    Ok(())
}

/// Paths are relative and `/`-separated, with no empty, `.` or `..` segments.
/// Backslashes and NUL bytes are rejected.
pub fn validate_path(workspace: &str, path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && !path.contains(['\\', '\0'])
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPath {
            workspace: workspace.to_string(),
            path: path.to_string(),
        })
    }
}
