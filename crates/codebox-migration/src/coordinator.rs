//! Migration coordinator
//!
//! Moves workspaces between backends. The source side is only ever read.
//! A destination workspace is never overwritten unless it is empty or
//! already identical to what would be written. Migration also refuses a
//! destination holding data of its own.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use codebox_storage::{MigrationRecord, StorageBackend, StorageError, Workspace};

use crate::archive::BackupArchive;
use crate::error::MigrationError;
use crate::seed::SeedData;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationStatus {
    Migrated {
        /// Workspaces written during this run
        copied: Vec<String>,
        /// Workspaces already present and identical in the destination
        skipped: Vec<String>,
    },
    AlreadyMigrated { completed_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub source: String,
    pub destination: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}

impl MigrationReport {
    /// Every workspace the destination now holds on behalf of the source
    pub fn workspaces(&self) -> Vec<String> {
        match &self.status {
            MigrationStatus::Migrated { copied, skipped } => {
                let all: BTreeSet<&String> = copied.iter().chain(skipped.iter()).collect();
                all.into_iter().cloned().collect()
            }
            MigrationStatus::AlreadyMigrated { .. } => Vec::new(),
        }
    }
}

/// What the destination held before a transfer.
#[derive(Debug, Default)]
struct DestinationPlan {
    /// Non-empty workspaces already identical to the incoming ones
    identical: BTreeSet<String>,
    /// Empty workspaces the transfer will overwrite, kept for rollback
    empty: BTreeMap<String, Workspace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unrelated {
    Refuse,
    Keep,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MigrationCoordinator;

impl MigrationCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Copy every workspace of `source` into `destination`.
    ///
    /// Workspaces are copied in name order and verified by reading them back.
    /// The destination may only hold empty workspaces or ones identical to
    /// the source's. The first failure stops the run; the failing workspace
    /// is rolled back in the destination and no migration record is written.
    pub async fn migrate(
        &self,
        source: &dyn StorageBackend,
        destination: &dyn StorageBackend,
    ) -> Result<MigrationReport> {
        ensure_loaded(source)?;
        ensure_loaded(destination)?;

        if let Some(record) = destination.migration_record(source.name()).await? {
            tracing::info!(
                source = %source.name(),
                destination = %destination.name(),
                completed_at = %record.completed_at,
                "Migration already completed"
            );
            return Ok(MigrationReport {
                source: source.name().to_string(),
                destination: destination.name().to_string(),
                status: MigrationStatus::AlreadyMigrated {
                    completed_at: record.completed_at,
                },
            });
        }

        let mut names: Vec<String> = source
            .list_workspaces()
            .await?
            .into_iter()
            .map(|meta| meta.name)
            .collect();
        names.sort();

        tracing::info!(
            source = %source.name(),
            destination = %destination.name(),
            workspaces = names.len(),
            "Starting migration"
        );

        let plan = self
            .check_destination(destination, &names, Unrelated::Refuse, |name| async move {
                source.read_workspace(&name).await
            })
            .await?;

        let mut copied = Vec::new();
        for name in names.iter().filter(|n| !plan.identical.contains(*n)) {
            let outcome = match source.read_workspace(name).await {
                Ok(workspace) => copy_workspace(destination, &workspace).await,
                Err(e) => Err(e),
            };

            if let Err(cause) = outcome {
                return Err(abort(destination, name, plan.empty.get(name), copied, cause).await);
            }

            tracing::debug!(workspace = %name, "Workspace migrated");
            copied.push(name.clone());
        }

        let record = MigrationRecord::new(source.name(), destination.name(), names);
        destination.write_migration_record(&record).await?;
        destination.check_workspaces().await?;

        tracing::info!(
            source = %source.name(),
            destination = %destination.name(),
            copied = copied.len(),
            skipped = plan.identical.len(),
            "Migration completed"
        );

        Ok(MigrationReport {
            source: source.name().to_string(),
            destination: destination.name().to_string(),
            status: MigrationStatus::Migrated {
                copied,
                skipped: plan.identical.into_iter().collect(),
            },
        })
    }

    /// Snapshot every workspace of `backend`. Nothing is written.
    pub async fn download_backup(&self, backend: &dyn StorageBackend) -> Result<BackupArchive> {
        ensure_loaded(backend)?;

        let mut workspaces = Vec::new();
        for meta in backend.list_workspaces().await? {
            workspaces.push(backend.read_workspace(&meta.name).await?);
        }

        let archive = BackupArchive::new(backend.name(), workspaces);
        tracing::info!(
            backend = %backend.name(),
            workspaces = archive.workspaces.len(),
            files = archive.file_count(),
            "Backup created"
        );
        Ok(archive)
    }

    /// Import every workspace of `archive` into `backend`.
    ///
    /// Returns the workspaces written. Workspaces already identical in the
    /// backend are left alone; differing non-empty ones abort the restore
    /// before anything is written. Workspaces the archive does not name are
    /// kept.
    pub async fn restore_backup(
        &self,
        archive: &BackupArchive,
        backend: &dyn StorageBackend,
    ) -> Result<Vec<String>> {
        ensure_loaded(backend)?;

        let names: Vec<String> = archive.workspaces.iter().map(|ws| ws.name.clone()).collect();
        let plan = self
            .check_destination(backend, &names, Unrelated::Keep, |name| async move {
                archive
                    .workspaces
                    .iter()
                    .find(|ws| ws.name == name)
                    .cloned()
                    .ok_or(StorageError::WorkspaceNotFound(name))
            })
            .await?;

        let mut restored = Vec::new();
        for workspace in archive
            .workspaces
            .iter()
            .filter(|ws| !plan.identical.contains(&ws.name))
        {
            if let Err(cause) = copy_workspace(backend, workspace).await {
                let original = plan.empty.get(&workspace.name);
                return Err(abort(backend, &workspace.name, original, restored, cause).await);
            }
            restored.push(workspace.name.clone());
        }

        backend.check_workspaces().await?;
        tracing::info!(
            backend = %backend.name(),
            source = %archive.source,
            restored = restored.len(),
            "Backup restored"
        );
        Ok(restored)
    }

    /// Write a seed dataset into `backend`, replacing same-named workspaces.
    pub async fn populate_workspace(
        &self,
        seed: &SeedData,
        backend: &dyn StorageBackend,
    ) -> Result<Vec<String>> {
        let result = self.write_seed(seed, backend).await;
        if let Err(e) = &result {
            tracing::error!(backend = %backend.name(), error = %e, "Failed to populate workspaces");
        }
        result
    }

    async fn write_seed(&self, seed: &SeedData, backend: &dyn StorageBackend) -> Result<Vec<String>> {
        ensure_loaded(backend)?;

        let mut written = Vec::new();
        for workspace in seed.to_workspaces()? {
            backend.write_workspace(&workspace).await?;
            written.push(workspace.name);
        }
        backend.check_workspaces().await?;

        tracing::info!(backend = %backend.name(), workspaces = written.len(), "Seed data written");
        Ok(written)
    }

    /// Compare every non-empty destination workspace against its incoming
    /// content. Identical ones are reported as already present; any other
    /// same-named one is a conflict. A non-empty workspace with no incoming
    /// counterpart is a conflict under `Unrelated::Refuse`.
    async fn check_destination<F, Fut>(
        &self,
        destination: &dyn StorageBackend,
        incoming: &[String],
        unrelated: Unrelated,
        load_incoming: F,
    ) -> Result<DestinationPlan>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<Workspace, StorageError>>,
    {
        let mut plan = DestinationPlan::default();

        for meta in destination.list_workspaces().await? {
            if !incoming.contains(&meta.name) {
                if !meta.is_empty() && unrelated == Unrelated::Refuse {
                    tracing::warn!(
                        backend = %destination.name(),
                        workspace = %meta.name,
                        "Destination already holds other workspaces"
                    );
                    return Err(MigrationError::DestinationNotEmpty {
                        backend: destination.name().to_string(),
                        workspace: meta.name,
                    });
                }
                continue;
            }

            if meta.is_empty() {
                let original = destination.read_workspace(&meta.name).await?;
                plan.empty.insert(meta.name, original);
                continue;
            }

            let existing = destination.read_workspace(&meta.name).await?;
            let candidate = load_incoming(meta.name.clone()).await?;

            if existing.digest() != candidate.digest() {
                tracing::warn!(
                    backend = %destination.name(),
                    workspace = %meta.name,
                    "Destination workspace holds different data"
                );
                return Err(MigrationError::DestinationNotEmpty {
                    backend: destination.name().to_string(),
                    workspace: meta.name,
                });
            }
            plan.identical.insert(meta.name);
        }

        Ok(plan)
    }
}

fn ensure_loaded(backend: &dyn StorageBackend) -> Result<()> {
    if backend.loaded() {
        Ok(())
    } else {
        Err(StorageError::NotLoaded(backend.name().to_string()).into())
    }
}

/// Write `workspace` and confirm the destination returns the same content.
async fn copy_workspace(
    destination: &dyn StorageBackend,
    workspace: &Workspace,
) -> std::result::Result<(), StorageError> {
    destination.write_workspace(workspace).await?;

    let written = destination.read_workspace(&workspace.name).await?;
    if written.digest() != workspace.digest() {
        return Err(StorageError::WorkspaceWriteFailure {
            workspace: workspace.name.clone(),
            reason: "content differs after write".to_string(),
        });
    }
    Ok(())
}

/// Roll back the failing workspace and build the failure report.
///
/// A workspace the run created is deleted. One that already existed empty
/// is written back as it was.
async fn abort(
    destination: &dyn StorageBackend,
    failed: &str,
    original: Option<&Workspace>,
    copied: Vec<String>,
    cause: StorageError,
) -> MigrationError {
    tracing::error!(
        backend = %destination.name(),
        workspace = %failed,
        error = %cause,
        copied = copied.len(),
        "Workspace transfer failed"
    );

    let rollback = match original {
        Some(workspace) => destination.write_workspace(workspace).await,
        None => match destination.delete_workspace(failed).await {
            Err(StorageError::WorkspaceNotFound(_)) => Ok(()),
            other => other,
        },
    };
    if let Err(e) = rollback {
        tracing::warn!(workspace = %failed, error = %e, "Could not roll back partial workspace");
    }

    MigrationError::MigrationIncomplete {
        failed: failed.to_string(),
        copied,
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codebox_storage::{IndexedBackend, KeyValueBackend, WorkspaceMeta};
    use parking_lot::Mutex;

    /// Delegates to an inner backend, failing non-empty writes of one workspace.
    struct FailingBackend {
        inner: IndexedBackend,
        fail_on: String,
        deleted: Mutex<Vec<String>>,
    }

    impl FailingBackend {
        async fn new(fail_on: &str) -> Self {
            let inner = IndexedBackend::in_memory();
            assert!(inner.probe().await.unwrap());
            Self {
                inner,
                fail_on: fail_on.to_string(),
                deleted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StorageBackend for FailingBackend {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn loaded(&self) -> bool {
            self.inner.loaded()
        }

        fn has_workspaces(&self) -> bool {
            self.inner.has_workspaces()
        }

        async fn probe(&self) -> codebox_storage::Result<bool> {
            self.inner.probe().await
        }

        async fn check_workspaces(&self) -> codebox_storage::Result<()> {
            self.inner.check_workspaces().await
        }

        async fn list_workspaces(&self) -> codebox_storage::Result<Vec<WorkspaceMeta>> {
            self.inner.list_workspaces().await
        }

        async fn read_workspace(&self, name: &str) -> codebox_storage::Result<Workspace> {
            self.inner.read_workspace(name).await
        }

        async fn write_workspace(&self, workspace: &Workspace) -> codebox_storage::Result<()> {
            if workspace.name == self.fail_on && !workspace.is_empty() {
                return Err(StorageError::QuotaExceeded {
                    required: 1024,
                    quota: 0,
                });
            }
            self.inner.write_workspace(workspace).await
        }

        async fn delete_workspace(&self, name: &str) -> codebox_storage::Result<()> {
            self.deleted.lock().push(name.to_string());
            self.inner.delete_workspace(name).await
        }

        async fn migration_record(
            &self,
            source: &str,
        ) -> codebox_storage::Result<Option<MigrationRecord>> {
            self.inner.migration_record(source).await
        }

        async fn write_migration_record(
            &self,
            record: &MigrationRecord,
        ) -> codebox_storage::Result<()> {
            self.inner.write_migration_record(record).await
        }
    }

    async fn legacy_with(workspaces: &[Workspace]) -> KeyValueBackend {
        let legacy = KeyValueBackend::in_memory();
        assert!(legacy.probe().await.unwrap());
        for ws in workspaces {
            legacy.write_workspace(ws).await.unwrap();
        }
        legacy.check_workspaces().await.unwrap();
        legacy
    }

    async fn preferred() -> IndexedBackend {
        let backend = IndexedBackend::in_memory();
        assert!(backend.probe().await.unwrap());
        backend.check_workspaces().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_contract_scenario() {
        let legacy = legacy_with(&[Workspace::new("default").with_file("contract.sol", "contract A {}")]).await;
        let preferred = preferred().await;
        assert!(!preferred.has_workspaces());

        let report = MigrationCoordinator::new()
            .migrate(&legacy, &preferred)
            .await
            .unwrap();

        assert_eq!(report.workspaces(), vec!["default".to_string()]);
        let copied = preferred.read_workspace("default").await.unwrap();
        assert_eq!(copied.file("contract.sol"), Some(&b"contract A {}"[..]));
        assert!(preferred.has_workspaces());

        let record = preferred.migration_record("keyvalue").await.unwrap().unwrap();
        assert_eq!(record.destination, "indexed");
        assert_eq!(record.workspaces, vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn test_fixture_migration_preserves_source() {
        let coordinator = MigrationCoordinator::new();
        let legacy = legacy_with(&[]).await;
        coordinator
            .populate_workspace(&SeedData::migration_fixture(), &legacy)
            .await
            .unwrap();
        let before = coordinator.download_backup(&legacy).await.unwrap();

        let preferred = preferred().await;
        coordinator.migrate(&legacy, &preferred).await.unwrap();

        let after = coordinator.download_backup(&legacy).await.unwrap();
        assert_eq!(before.workspaces, after.workspaces);

        for ws in &before.workspaces {
            let copied = preferred.read_workspace(&ws.name).await.unwrap();
            assert!(copied.same_content(ws), "workspace {} differs", ws.name);
        }
        assert!(preferred.read_workspace("emptyspace").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_reports_already_migrated() {
        let coordinator = MigrationCoordinator::new();
        let legacy = legacy_with(&[Workspace::new("default").with_file("a.sol", "a")]).await;
        let preferred = preferred().await;

        coordinator.migrate(&legacy, &preferred).await.unwrap();
        let report = coordinator.migrate(&legacy, &preferred).await.unwrap();
        assert!(matches!(report.status, MigrationStatus::AlreadyMigrated { .. }));
    }

    #[tokio::test]
    async fn test_partial_failure_is_contained() {
        let legacy = legacy_with(&[
            Workspace::new("a").with_file("a.sol", "a"),
            Workspace::new("b").with_file("b.sol", "b"),
            Workspace::new("c").with_file("c.sol", "c"),
        ])
        .await;
        let coordinator = MigrationCoordinator::new();
        let destination = FailingBackend::new("b").await;
        let before = coordinator.download_backup(&legacy).await.unwrap();

        let err = coordinator.migrate(&legacy, &destination).await.unwrap_err();

        match err {
            MigrationError::MigrationIncomplete { failed, copied, .. } => {
                assert_eq!(failed, "b");
                assert_eq!(copied, vec!["a".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(*destination.deleted.lock(), vec!["b".to_string()]);
        assert!(destination.read_workspace("a").await.is_ok());
        assert!(matches!(
            destination.read_workspace("c").await,
            Err(StorageError::WorkspaceNotFound(_))
        ));
        assert!(destination.migration_record("keyvalue").await.unwrap().is_none());

        let after = coordinator.download_backup(&legacy).await.unwrap();
        assert_eq!(before.workspaces, after.workspaces);
    }

    #[tokio::test]
    async fn test_failure_keeps_existing_empty_workspace() {
        let legacy = legacy_with(&[Workspace::new("b").with_file("b.sol", "b")]).await;
        let destination = FailingBackend::new("b").await;
        destination.write_workspace(&Workspace::new("b")).await.unwrap();

        let err = MigrationCoordinator::new()
            .migrate(&legacy, &destination)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::MigrationIncomplete { .. }));

        assert!(destination.deleted.lock().is_empty());
        assert!(destination.read_workspace("b").await.unwrap().is_empty());
        assert!(destination.migration_record("keyvalue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destination_with_own_workspaces_is_refused() {
        let coordinator = MigrationCoordinator::new();
        let legacy = legacy_with(&[Workspace::new("default").with_file("a.sol", "legacy")]).await;
        let preferred = preferred().await;
        let mine = Workspace::new("mine").with_file("mine.sol", "contract Mine {}");
        preferred.write_workspace(&mine).await.unwrap();
        preferred.check_workspaces().await.unwrap();
        assert!(preferred.has_workspaces());

        let err = coordinator.migrate(&legacy, &preferred).await.unwrap_err();
        match err {
            MigrationError::DestinationNotEmpty { workspace, .. } => assert_eq!(workspace, "mine"),
            other => panic!("unexpected error: {other}"),
        }

        let names: Vec<String> = preferred
            .list_workspaces()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["mine".to_string()]);
        assert!(preferred.read_workspace("mine").await.unwrap().same_content(&mine));
        assert!(preferred.migration_record("keyvalue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_unrelated_workspace_does_not_block() {
        let legacy = legacy_with(&[Workspace::new("default").with_file("a.sol", "a")]).await;
        let preferred = preferred().await;
        preferred.write_workspace(&Workspace::new("scratch")).await.unwrap();

        let report = MigrationCoordinator::new()
            .migrate(&legacy, &preferred)
            .await
            .unwrap();
        assert_eq!(report.workspaces(), vec!["default".to_string()]);
        assert!(preferred.read_workspace("scratch").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_failure_skips_identical() {
        let coordinator = MigrationCoordinator::new();
        let legacy = legacy_with(&[
            Workspace::new("a").with_file("a.sol", "a"),
            Workspace::new("b").with_file("b.sol", "b"),
        ])
        .await;
        let preferred = preferred().await;
        preferred
            .write_workspace(&Workspace::new("a").with_file("a.sol", "a"))
            .await
            .unwrap();

        let report = coordinator.migrate(&legacy, &preferred).await.unwrap();
        assert_eq!(
            report.status,
            MigrationStatus::Migrated {
                copied: vec!["b".to_string()],
                skipped: vec!["a".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_conflicting_destination_is_refused() {
        let legacy = legacy_with(&[Workspace::new("default").with_file("a.sol", "legacy")]).await;
        let preferred = preferred().await;
        preferred
            .write_workspace(&Workspace::new("default").with_file("a.sol", "preferred"))
            .await
            .unwrap();

        let err = MigrationCoordinator::new()
            .migrate(&legacy, &preferred)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::DestinationNotEmpty { .. }));

        let kept = preferred.read_workspace("default").await.unwrap();
        assert_eq!(kept.file("a.sol"), Some(&b"preferred"[..]));
    }

    #[tokio::test]
    async fn test_unloaded_backend_is_rejected() {
        let legacy = legacy_with(&[]).await;
        let unprobed = IndexedBackend::in_memory();

        assert!(matches!(
            MigrationCoordinator::new().migrate(&legacy, &unprobed).await,
            Err(MigrationError::Storage(StorageError::NotLoaded(_)))
        ));
    }

    #[tokio::test]
    async fn test_backup_restores_into_empty_backend() {
        let coordinator = MigrationCoordinator::new();
        let legacy = legacy_with(&[]).await;
        coordinator
            .populate_workspace(&SeedData::migration_fixture(), &legacy)
            .await
            .unwrap();

        let archive = coordinator.download_backup(&legacy).await.unwrap();
        let parsed = BackupArchive::from_bytes(&archive.to_bytes().unwrap()).unwrap();

        let target = preferred().await;
        let restored = coordinator.restore_backup(&parsed, &target).await.unwrap();
        assert_eq!(
            restored,
            vec![
                "default_workspace".to_string(),
                "emptyspace".to_string(),
                "workspace_test".to_string(),
            ]
        );

        for ws in &archive.workspaces {
            let copied = target.read_workspace(&ws.name).await.unwrap();
            assert!(copied.same_content(ws));
        }

        // Restoring the same archive again changes nothing.
        let again = coordinator.restore_backup(&parsed, &target).await.unwrap();
        assert!(!again.contains(&"default_workspace".to_string()));
    }

    #[tokio::test]
    async fn test_restore_keeps_unrelated_workspaces() {
        let coordinator = MigrationCoordinator::new();
        let legacy = legacy_with(&[Workspace::new("default").with_file("a.sol", "a")]).await;
        let archive = coordinator.download_backup(&legacy).await.unwrap();

        let target = preferred().await;
        let mine = Workspace::new("mine").with_file("mine.sol", "m");
        target.write_workspace(&mine).await.unwrap();

        let restored = coordinator.restore_backup(&archive, &target).await.unwrap();
        assert_eq!(restored, vec!["default".to_string()]);
        assert!(target.read_workspace("mine").await.unwrap().same_content(&mine));
    }

    #[tokio::test]
    async fn test_populate_reports_rejection() {
        let destination = FailingBackend::new("workspace_test").await;
        let err = MigrationCoordinator::new()
            .populate_workspace(&SeedData::migration_fixture(), &destination)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MigrationError::Storage(StorageError::QuotaExceeded { .. })
        ));
    }
}
