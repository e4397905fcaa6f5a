//! Registry error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No storage backend available in this environment")]
    NoBackendAvailable,

    #[error("Storage error: {0}")]
    Storage(#[from] codebox_storage::StorageError),
}
