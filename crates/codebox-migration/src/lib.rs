//! CodeBox Migration & Backup
//!
//! - One-way, verified copy of every workspace from a legacy backend into a
//!   preferred backend, recorded so it never repeats automatically
//! - Portable, versioned backup archives for manual export and restore
//! - Deterministic fixtures for diagnostics

mod archive;
mod coordinator;
mod error;
mod seed;

pub use archive::{ArchiveEntry, BackupArchive, ARCHIVE_FORMAT_VERSION};
pub use coordinator::{MigrationCoordinator, MigrationReport, MigrationStatus};
pub use error::MigrationError;
pub use seed::{SeedData, SeedNode};

pub type Result<T> = std::result::Result<T, MigrationError>;
