//! Diagnostic overrides
//!
//! Test harnesses use these flags to force tiers to be treated as absent.
//! They are the only external control over selection besides probing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use codebox_storage::StorageBackend;

const DIAGNOSTIC_HOST: &str = "127.0.0.1";
const DIAGNOSTIC_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticOverrides {
    /// Skip the preferred tier so the legacy tier is selected
    pub force_fallback: bool,
    /// Skip every tier so no storage is selected
    pub block_storage: bool,
    /// Populate the legacy tier with the migration fixture before checking
    pub seed_legacy: bool,
}

impl DiagnosticOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.force_fallback || self.block_storage || self.seed_legacy
    }

    /// Read flags from a page URL fragment such as
    /// `http://127.0.0.1:8080/#diag_force_fallback=true`.
    ///
    /// Only the local test server may set them; any other origin yields no
    /// overrides.
    pub fn from_url(page_url: &str) -> Self {
        let url = match Url::parse(page_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(url = %page_url, error = %e, "Ignoring unparsable page URL");
                return Self::none();
            }
        };

        let local = url.scheme() == "http"
            && url.host_str() == Some(DIAGNOSTIC_HOST)
            && url.port() == Some(DIAGNOSTIC_PORT);
        if !local {
            return Self::none();
        }

        let fragment = url.fragment().unwrap_or_default();
        let flag = |name: &str| {
            fragment
                .split('&')
                .any(|pair| pair == format!("{}=true", name))
        };

        let overrides = Self {
            force_fallback: flag("diag_force_fallback"),
            block_storage: flag("diag_block_storage"),
            seed_legacy: flag("diag_seed_legacy"),
        };

        if overrides.is_active() {
            tracing::info!(?overrides, "Diagnostic storage overrides enabled");
        }
        overrides
    }

    /// Priority-ordered candidate list for `BackendRegistry::select_active`.
    /// A `None` entry means the tier is force-skipped.
    pub fn candidates(
        &self,
        preferred: Option<Arc<dyn StorageBackend>>,
        legacy: Option<Arc<dyn StorageBackend>>,
    ) -> Vec<Option<Arc<dyn StorageBackend>>> {
        let preferred = if self.force_fallback || self.block_storage {
            None
        } else {
            preferred
        };
        let legacy = if self.block_storage { None } else { legacy };
        vec![preferred, legacy]
    }
}
