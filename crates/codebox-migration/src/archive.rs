//! Backup archive format
//!
//! A gzip-compressed tar. The first entry is `manifest.json`, carrying the
//! format version, the source backend and per-workspace metadata (timestamps
//! and directories). File contents follow as `workspaces/<name>/<path>`.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

use codebox_storage::{StorageError, Workspace};

use crate::error::MigrationError;
use crate::Result;

pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

const MANIFEST_NAME: &str = "manifest.json";
const WORKSPACES_DIR: &str = "workspaces/";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    created_at: DateTime<Utc>,
    source: String,
    workspaces: Vec<ManifestWorkspace>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestWorkspace {
    name: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    directories: Vec<String>,
}

/// One (workspace, path, content) tuple of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveEntry<'a> {
    pub workspace: &'a str,
    pub path: &'a str,
    pub content: &'a [u8],
}

/// Self-contained snapshot of every workspace in a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArchive {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    /// Name of the backend the snapshot was taken from
    pub source: String,
    pub workspaces: Vec<Workspace>,
}

impl BackupArchive {
    pub fn new(source: &str, workspaces: Vec<Workspace>) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION,
            created_at: Utc::now(),
            source: source.to_string(),
            workspaces,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = ArchiveEntry<'_>> {
        self.workspaces.iter().flat_map(|ws| {
            ws.files.iter().map(move |(path, content)| ArchiveEntry {
                workspace: &ws.name,
                path,
                content,
            })
        })
    }

    pub fn file_count(&self) -> usize {
        self.workspaces.iter().map(|ws| ws.files.len()).sum()
    }

    /// Suggested download name
    pub fn file_name(&self) -> String {
        format!(
            "codebox_backup_{}.tar.gz",
            self.created_at.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let manifest = Manifest {
            format_version: self.format_version,
            created_at: self.created_at,
            source: self.source.clone(),
            workspaces: self
                .workspaces
                .iter()
                .map(|ws| ManifestWorkspace {
                    name: ws.name.clone(),
                    created_at: ws.created_at,
                    updated_at: ws.updated_at,
                    directories: ws.directories.iter().cloned().collect(),
                })
                .collect(),
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        let mtime = self.created_at.timestamp().max(0) as u64;

        let enc = GzEncoder::new(writer, Compression::default());
        let mut tar = tar::Builder::new(enc);

        append_file(&mut tar, MANIFEST_NAME, &manifest_json, mtime)?;
        for entry in self.entries() {
            let name = format!("{}{}/{}", WORKSPACES_DIR, entry.workspace, entry.path);
            append_file(&mut tar, &name, entry.content, mtime)?;
        }

        tar.into_inner()?.finish()?;
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }

    /// Parse an archive. Unknown format versions are refused before any
    /// workspace data is interpreted.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut archive = tar::Archive::new(GzDecoder::new(reader));

        let mut manifest: Option<Manifest> = None;
        let mut files: Vec<(String, Vec<u8>)> = Vec::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let name = String::from_utf8(entry.path_bytes().into_owned())
                .map_err(|_| MigrationError::MalformedArchive("non UTF-8 entry name".into()))?;
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;

            if name == MANIFEST_NAME {
                manifest = Some(parse_manifest(&content)?);
            } else {
                files.push((name, content));
            }
        }

        let manifest = manifest
            .ok_or_else(|| MigrationError::MalformedArchive("missing manifest.json".into()))?;

        let mut workspaces: BTreeMap<String, Workspace> = BTreeMap::new();
        let mut order = Vec::with_capacity(manifest.workspaces.len());
        for meta in manifest.workspaces {
            let mut ws = Workspace::new(meta.name.clone());
            ws.created_at = meta.created_at;
            ws.updated_at = meta.updated_at;
            ws.directories.extend(meta.directories);
            order.push(meta.name.clone());
            if workspaces.insert(meta.name.clone(), ws).is_some() {
                return Err(MigrationError::MalformedArchive(format!(
                    "duplicate workspace {}",
                    meta.name
                )));
            }
        }

        for (name, content) in files {
            let rest = name.strip_prefix(WORKSPACES_DIR).ok_or_else(|| {
                MigrationError::MalformedArchive(format!("unexpected entry {}", name))
            })?;
            let (ws_name, path) = rest.split_once('/').ok_or_else(|| {
                MigrationError::MalformedArchive(format!("entry outside a workspace: {}", name))
            })?;
            let ws = workspaces.get_mut(ws_name).ok_or_else(|| {
                MigrationError::MalformedArchive(format!("unknown workspace {}", ws_name))
            })?;
            ws.files.insert(path.to_string(), content);
        }

        let mut ordered = Vec::with_capacity(order.len());
        for name in order {
            if let Some(ws) = workspaces.remove(&name) {
                ws.validate().map_err(|e| match e {
                    StorageError::InvalidPath { .. } | StorageError::InvalidWorkspaceName(_) => {
                        MigrationError::MalformedArchive(e.to_string())
                    }
                    other => MigrationError::Storage(other),
                })?;
                ordered.push(ws);
            }
        }

        Ok(Self {
            format_version: manifest.format_version,
            created_at: manifest.created_at,
            source: manifest.source,
            workspaces: ordered,
        })
    }
}

fn parse_manifest(raw: &[u8]) -> Result<Manifest> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    let found = value
        .get("format_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| MigrationError::MalformedArchive("manifest without format_version".into()))?;

    if found != u64::from(ARCHIVE_FORMAT_VERSION) {
        return Err(MigrationError::ArchiveVersionMismatch {
            found: u32::try_from(found).unwrap_or(u32::MAX),
            supported: ARCHIVE_FORMAT_VERSION,
        });
    }

    Ok(serde_json::from_value(value)?)
}

fn append_file<W: Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    content: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_cksum();

    tar.append_data(&mut header, name, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BackupArchive {
        BackupArchive::new(
            "keyvalue",
            vec![
                Workspace::new("default_workspace")
                    .with_file("contracts/1_Storage.sol", "contract Storage {}")
                    .with_file("bin/data.bin", vec![0u8, 1, 2, 254, 255]),
                Workspace::new("emptyspace"),
            ],
        )
    }

    #[test]
    fn test_bytes_roundtrip_preserves_content() {
        let archive = sample();
        let bytes = archive.to_bytes().unwrap();
        let parsed = BackupArchive::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.format_version, ARCHIVE_FORMAT_VERSION);
        assert_eq!(parsed.source, "keyvalue");
        assert_eq!(parsed.workspaces.len(), 2);
        for (a, b) in archive.workspaces.iter().zip(parsed.workspaces.iter()) {
            assert_eq!(a.name, b.name);
            assert!(a.same_content(b));
        }
        assert!(parsed.workspaces[1].is_empty());
    }

    #[test]
    fn test_entries_are_tuples() {
        let archive = sample();
        let entries: Vec<(String, String)> = archive
            .entries()
            .map(|e| (e.workspace.to_string(), e.path.to_string()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("default_workspace".to_string(), "bin/data.bin".to_string()),
                ("default_workspace".to_string(), "contracts/1_Storage.sol".to_string()),
            ]
        );
        assert_eq!(archive.file_count(), 2);
    }

    #[test]
    fn test_file_name() {
        let archive = sample();
        let name = archive.file_name();
        assert!(name.starts_with("codebox_backup_"));
        assert!(name.ends_with(".tar.gz"));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut archive = sample();
        archive.format_version = ARCHIVE_FORMAT_VERSION + 1;
        let bytes = archive.to_bytes().unwrap();

        match BackupArchive::from_bytes(&bytes) {
            Err(MigrationError::ArchiveVersionMismatch { found, supported }) => {
                assert_eq!(found, ARCHIVE_FORMAT_VERSION + 1);
                assert_eq!(supported, ARCHIVE_FORMAT_VERSION);
            }
            other => panic!("expected version mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_manifest_rejected() {
        let enc = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = tar::Builder::new(enc);
        append_file(&mut tar, "workspaces/ws/a.txt", b"a", 0).unwrap();
        let bytes = tar.into_inner().unwrap().finish().unwrap();

        assert!(matches!(
            BackupArchive::from_bytes(&bytes),
            Err(MigrationError::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(BackupArchive::from_bytes(b"definitely not gzip").is_err());
    }
}
