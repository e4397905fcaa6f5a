//! CodeBox Storage Layer
//!
//! The backend contract shared by every storage engine, the workspace model
//! that moves between them, and the two engines themselves:
//! an indexed transactional store (preferred) and a simple key-value store
//! (legacy).

mod backend;
mod database;
mod error;
mod indexed;
mod keyvalue;
mod migrations;
mod workspace;

pub use backend::{StorageBackend, StorageLocation};
pub use error::StorageError;
pub use indexed::{IndexedBackend, INDEXED_BACKEND_NAME};
pub use keyvalue::{KeyValueBackend, DEFAULT_QUOTA_BYTES, KEY_VALUE_BACKEND_NAME};
pub use workspace::{
    validate_path, validate_workspace_name, MigrationRecord, Workspace, WorkspaceMeta,
};

pub type Result<T> = std::result::Result<T, StorageError>;
