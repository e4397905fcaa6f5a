//! Migration error types

use thiserror::Error;

use codebox_storage::StorageError;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Migration incomplete: workspace {failed} failed after copying {copied:?}: {cause}")]
    MigrationIncomplete {
        failed: String,
        copied: Vec<String>,
        #[source]
        cause: StorageError,
    },

    #[error("Destination {backend} already holds different data in workspace {workspace}")]
    DestinationNotEmpty { backend: String, workspace: String },

    #[error("Unsupported archive version {found} (supported: {supported})")]
    ArchiveVersionMismatch { found: u32, supported: u32 },

    #[error("Malformed backup archive: {0}")]
    MalformedArchive(String),

    #[error("Invalid seed data: {0}")]
    InvalidSeed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
