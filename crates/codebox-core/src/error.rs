//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] codebox_storage::StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] codebox_registry::RegistryError),

    #[error("Migration error: {0}")]
    Migration(#[from] codebox_migration::MigrationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
