//! Storage startup pipeline
//!
//! Runs once per session before the application loads:
//! probe → seed diagnostics → check workspaces → decide → resolve migration → select.
//! Each stage is public so hosts and tests can drive them one at a time.
//! A backend whose data cannot be scanned is dropped for the session; it
//! never stops startup.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use codebox_migration::{MigrationCoordinator, MigrationReport, SeedData};
use codebox_registry::{BackendRegistry, Decision, PolicyInput, SelectionPolicy, TierState};
use codebox_storage::{
    IndexedBackend, KeyValueBackend, StorageBackend, StorageError, StorageLocation,
};

use crate::config::Config;
use crate::tips::{TipFetcher, TipHandle};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupChoice {
    DownloadBackup,
    SkipBackup,
}

/// Host-side collaborator asked before legacy data is migrated.
#[async_trait]
pub trait BackupPrompt: Send + Sync {
    async fn choose(
        &self,
        legacy: &dyn StorageBackend,
        preferred: &dyn StorageBackend,
    ) -> BackupChoice;

    /// Hand a finished archive to the user.
    async fn save_backup(&self, file_name: &str, bytes: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub preferred: bool,
    pub legacy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Completed(MigrationReport),
    /// Migration ran and stopped; the message is shown to the user
    Failed(String),
    /// Nobody was available to confirm; legacy stays active this session
    Deferred,
}

pub enum PreloadOutcome {
    /// The desktop shell manages storage itself
    DesktopShell,
    Ready {
        active: Arc<dyn StorageBackend>,
        migration: Option<MigrationOutcome>,
    },
    Unsupported,
}

impl fmt::Debug for PreloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreloadOutcome::DesktopShell => f.write_str("DesktopShell"),
            PreloadOutcome::Ready { active, migration } => f
                .debug_struct("Ready")
                .field("active", &active.name())
                .field("migration", migration)
                .finish(),
            PreloadOutcome::Unsupported => f.write_str("Unsupported"),
        }
    }
}

/// Everything a launch hands back to the host.
pub struct Startup {
    pub outcome: PreloadOutcome,
    /// Loading-screen tip still in flight; cancel or drop it once the
    /// application is up
    pub tips: Option<TipHandle>,
}

pub struct Preloader {
    config: Config,
    registry: BackendRegistry,
    preferred: Arc<dyn StorageBackend>,
    legacy: Arc<dyn StorageBackend>,
    coordinator: MigrationCoordinator,
    prompt: Option<Arc<dyn BackupPrompt>>,
    /// Backends that probed fine but failed scanning this session
    unusable: RwLock<BTreeSet<String>>,
}

impl Preloader {
    /// Build the file-backed backends named in `config`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        for path in [&config.indexed_db_path, &config.key_value_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let preferred: Arc<dyn StorageBackend> = Arc::new(IndexedBackend::new(
            StorageLocation::Path(config.indexed_db_path.clone()),
        ));
        let legacy: Arc<dyn StorageBackend> = Arc::new(KeyValueBackend::with_quota(
            StorageLocation::Path(config.key_value_path.clone()),
            config.key_value_quota_bytes,
        ));

        Ok(Self::with_backends(config, preferred, legacy))
    }

    pub fn with_backends(
        config: Config,
        preferred: Arc<dyn StorageBackend>,
        legacy: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            config,
            registry: BackendRegistry::new(),
            preferred,
            legacy,
            coordinator: MigrationCoordinator::new(),
            prompt: None,
            unusable: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn BackupPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Start the tip fetch, then run the storage pipeline. The fetch is
    /// never awaited here.
    pub async fn launch(&self) -> Startup {
        let tips = self.start_tips();
        let outcome = self.run().await;
        Startup { outcome, tips }
    }

    /// Spawn the loading-screen tip fetch when a source is configured.
    pub fn start_tips(&self) -> Option<TipHandle> {
        let url = self.config.tips_url.as_deref()?;
        match TipFetcher::new(url) {
            Ok(fetcher) => Some(fetcher.spawn()),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Tip fetcher unavailable");
                None
            }
        }
    }

    /// Run every stage and report what the session should use.
    pub async fn run(&self) -> PreloadOutcome {
        if self.config.desktop_shell {
            tracing::info!("Desktop shell detected, skipping browser storage");
            return PreloadOutcome::DesktopShell;
        }

        self.probe_backends().await;

        if let Err(e) = self.seed_diagnostics().await {
            tracing::warn!(error = %e, "Diagnostic seeding failed");
        }

        let input = self.check_workspaces().await;
        let decision = self.decide(input);
        let migration = self.resolve_migration(decision).await;

        self.select(migration)
    }

    pub async fn probe_backends(&self) -> ProbeReport {
        let results = self
            .registry
            .add_backends(vec![Arc::clone(&self.preferred), Arc::clone(&self.legacy)])
            .await;

        ProbeReport {
            preferred: results.first().copied().unwrap_or(false),
            legacy: results.get(1).copied().unwrap_or(false),
        }
    }

    /// Populate the legacy backend with the migration fixture when asked to.
    pub async fn seed_diagnostics(&self) -> Result<Option<Vec<String>>> {
        if !self.config.diagnostics.seed_legacy || !self.legacy.loaded() {
            return Ok(None);
        }

        let written = self
            .coordinator
            .populate_workspace(&SeedData::migration_fixture(), self.legacy.as_ref())
            .await?;
        Ok(Some(written))
    }

    /// Scan both tiers and read the preferred tier's migration record.
    pub async fn check_workspaces(&self) -> PolicyInput {
        for backend in [&self.preferred, &self.legacy] {
            if backend.loaded() {
                if let Err(e) = backend.check_workspaces().await {
                    self.mark_unusable(&**backend, &e);
                }
            }
        }

        let mut migration_recorded = false;
        if self.usable(self.preferred.as_ref()) {
            match self.preferred.migration_record(self.legacy.name()).await {
                Ok(record) => migration_recorded = record.is_some(),
                Err(e) => self.mark_unusable(self.preferred.as_ref(), &e),
            }
        }

        PolicyInput {
            preferred: self.tier_state(self.preferred.as_ref()),
            legacy: self.tier_state(self.legacy.as_ref()),
            migration_recorded,
        }
    }

    fn mark_unusable(&self, backend: &dyn StorageBackend, error: &StorageError) {
        tracing::warn!(
            backend = %backend.name(),
            error = %error,
            "Stored data unreadable, backend disabled for this session"
        );
        self.unusable.write().insert(backend.name().to_string());
    }

    fn usable(&self, backend: &dyn StorageBackend) -> bool {
        backend.loaded() && !self.unusable.read().contains(backend.name())
    }

    fn tier_state(&self, backend: &dyn StorageBackend) -> TierState {
        if self.usable(backend) {
            TierState::of(backend)
        } else {
            TierState::unavailable()
        }
    }

    pub fn decide(&self, input: PolicyInput) -> Decision {
        let decision = SelectionPolicy::decide(input);
        tracing::info!(
            decision = decision.as_str(),
            preferred_loaded = input.preferred.loaded,
            preferred_has_workspaces = input.preferred.has_workspaces,
            legacy_loaded = input.legacy.loaded,
            legacy_has_workspaces = input.legacy.has_workspaces,
            "Storage decision"
        );
        decision
    }

    /// Offer a backup and migrate when the decision calls for it.
    ///
    /// Errors are captured in the outcome; a failed migration never prevents
    /// the session from starting.
    pub async fn resolve_migration(&self, decision: Decision) -> Option<MigrationOutcome> {
        if decision != Decision::OfferMigration {
            return None;
        }

        if !self.config.auto_migrate {
            let Some(prompt) = &self.prompt else {
                tracing::warn!("Legacy data present but no backup prompt available, deferring migration");
                return Some(MigrationOutcome::Deferred);
            };

            match prompt
                .choose(self.legacy.as_ref(), self.preferred.as_ref())
                .await
            {
                BackupChoice::DownloadBackup => {
                    if let Err(e) = self.download_backup(prompt.as_ref()).await {
                        tracing::error!(error = %e, "Backup download failed");
                    }
                }
                BackupChoice::SkipBackup => {
                    tracing::info!("Backup skipped");
                }
            }
        }

        let outcome = match self
            .coordinator
            .migrate(self.legacy.as_ref(), self.preferred.as_ref())
            .await
        {
            Ok(report) => MigrationOutcome::Completed(report),
            Err(e) => {
                tracing::error!(error = %e, "Migration failed");
                MigrationOutcome::Failed(e.to_string())
            }
        };
        Some(outcome)
    }

    async fn download_backup(&self, prompt: &dyn BackupPrompt) -> Result<()> {
        let archive = self.coordinator.download_backup(self.legacy.as_ref()).await?;
        let bytes = archive.to_bytes()?;
        prompt.save_backup(&archive.file_name(), bytes).await
    }

    /// Activate the first usable candidate, honouring diagnostic overrides.
    pub fn select(&self, migration: Option<MigrationOutcome>) -> PreloadOutcome {
        let mut candidates = self
            .config
            .diagnostics
            .candidates(Some(Arc::clone(&self.preferred)), Some(Arc::clone(&self.legacy)));
        if migration == Some(MigrationOutcome::Deferred) {
            candidates[0] = None;
        }
        for candidate in candidates.iter_mut() {
            if matches!(candidate, Some(backend) if !self.usable(&**backend)) {
                *candidate = None;
            }
        }

        match self.registry.select_active(&candidates) {
            Some(active) => PreloadOutcome::Ready { active, migration },
            None => PreloadOutcome::Unsupported,
        }
    }
}
