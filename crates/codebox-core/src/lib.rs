//! CodeBox Core
//!
//! Startup coordination for CodeBox storage: configuration, the staged
//! preload pipeline that picks the session's backend and offers migration,
//! and the loading-screen tip fetch.

mod config;
mod error;
mod preloader;
mod tips;

pub use config::{Config, DEFAULT_TIPS_URL};
pub use error::CoreError;
pub use preloader::{
    BackupChoice, BackupPrompt, MigrationOutcome, PreloadOutcome, Preloader, ProbeReport, Startup,
};
pub use tips::{TipFetcher, TipHandle};

// Re-export the storage stack
pub use codebox_migration::{
    BackupArchive, MigrationCoordinator, MigrationError, MigrationReport, MigrationStatus,
    SeedData,
};
pub use codebox_registry::{
    BackendRegistry, Decision, DiagnosticOverrides, PolicyInput, RegistryError, SelectionPolicy,
    TierState,
};
pub use codebox_storage::{
    IndexedBackend, KeyValueBackend, MigrationRecord, StorageBackend, StorageError,
    StorageLocation, Workspace, WorkspaceMeta,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
