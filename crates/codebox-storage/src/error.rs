//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Backend unsupported in this environment: {0}")]
    Unsupported(String),

    #[error("Backend not loaded: {0}")]
    NotLoaded(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Invalid workspace name: {0:?}")]
    InvalidWorkspaceName(String),

    #[error("Invalid path in workspace {workspace}: {path:?}")]
    InvalidPath { workspace: String, path: String },

    #[error("Failed to read workspace {workspace}: {reason}")]
    WorkspaceReadFailure { workspace: String, reason: String },

    #[error("Failed to write workspace {workspace}: {reason}")]
    WorkspaceWriteFailure { workspace: String, reason: String },

    #[error("Quota exceeded: {required} bytes required, {quota} bytes available")]
    QuotaExceeded { required: usize, quota: usize },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    /// Wrap an engine-level error raised while reading `workspace`.
    ///
    /// Errors that already describe a workspace-level condition pass through.
    pub fn read_failure(workspace: &str, err: StorageError) -> Self {
        match err {
            e @ (StorageError::WorkspaceNotFound(_)
            | StorageError::InvalidWorkspaceName(_)
            | StorageError::NotLoaded(_)
            | StorageError::Unsupported(_)
            | StorageError::WorkspaceReadFailure { .. }) => e,
            other => StorageError::WorkspaceReadFailure {
                workspace: workspace.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Wrap an engine-level error raised while writing `workspace`.
    pub fn write_failure(workspace: &str, err: StorageError) -> Self {
        match err {
            e @ (StorageError::InvalidWorkspaceName(_)
            | StorageError::InvalidPath { .. }
            | StorageError::NotLoaded(_)
            | StorageError::Unsupported(_)
            | StorageError::WorkspaceWriteFailure { .. }) => e,
            other => StorageError::WorkspaceWriteFailure {
                workspace: workspace.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
