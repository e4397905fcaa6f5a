//! CodeBox Backend Registry
//!
//! - Probes candidate backends and keeps only the usable ones
//! - Decides which single backend is active for the session
//! - Diagnostic overrides can force tiers to be treated as absent

mod diagnostics;
mod error;
mod policy;
mod registry;

pub use diagnostics::DiagnosticOverrides;
pub use error::RegistryError;
pub use policy::{Decision, PolicyInput, SelectionPolicy, TierState};
pub use registry::BackendRegistry;

pub type Result<T> = std::result::Result<T, RegistryError>;
