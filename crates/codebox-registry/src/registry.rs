//! Backend registry
//!
//! Owns the probed candidates and the session's single active backend.

use futures_util::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;

use codebox_storage::StorageBackend;

use crate::error::RegistryError;
use crate::Result;

pub struct BackendRegistry {
    /// Backends that passed probing, in registration order
    backends: Arc<RwLock<Vec<Arc<dyn StorageBackend>>>>,
    /// Backend selected for this session
    active: Arc<RwLock<Option<Arc<dyn StorageBackend>>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: Arc::new(RwLock::new(Vec::new())),
            active: Arc::new(RwLock::new(None)),
        }
    }

    /// Probe `backend` and retain it when usable.
    ///
    /// A probe error is treated like an unsupported engine: the backend is
    /// discarded and never selected.
    pub async fn add_backend(&self, backend: Arc<dyn StorageBackend>) -> bool {
        let usable = match backend.probe().await {
            Ok(usable) => usable,
            Err(e) => {
                tracing::warn!(backend = %backend.name(), error = %e, "Probe failed");
                false
            }
        };

        if usable {
            self.retain(backend);
        } else {
            tracing::warn!(backend = %backend.name(), "Storage backend not supported");
        }
        usable
    }

    /// Probe several independent backends concurrently. Results are in input order.
    pub async fn add_backends(&self, backends: Vec<Arc<dyn StorageBackend>>) -> Vec<bool> {
        let probes = backends.iter().map(|b| {
            let b = Arc::clone(b);
            async move {
                match b.probe().await {
                    Ok(usable) => usable,
                    Err(e) => {
                        tracing::warn!(backend = %b.name(), error = %e, "Probe failed");
                        false
                    }
                }
            }
        });
        let results = join_all(probes).await;

        for (backend, usable) in backends.into_iter().zip(results.iter()) {
            if *usable {
                self.retain(backend);
            } else {
                tracing::warn!(backend = %backend.name(), "Storage backend not supported");
            }
        }
        results
    }

    fn retain(&self, backend: Arc<dyn StorageBackend>) {
        let mut backends = self.backends.write();
        if !backends.iter().any(|b| b.name() == backend.name()) {
            tracing::info!(backend = %backend.name(), "Registered storage backend");
            backends.push(backend);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageBackend>> {
        self.backends
            .read()
            .iter()
            .find(|b| b.name() == name)
            .cloned()
    }

    pub fn backends(&self) -> Vec<Arc<dyn StorageBackend>> {
        self.backends.read().clone()
    }

    /// Pick the first candidate that is present and loaded.
    ///
    /// `None` entries are force-skipped tiers. Returns `None` when nothing
    /// qualifies, which the application reports as an unsupported environment.
    pub fn select_active(
        &self,
        candidates: &[Option<Arc<dyn StorageBackend>>],
    ) -> Option<Arc<dyn StorageBackend>> {
        let selected = candidates
            .iter()
            .flatten()
            .find(|b| b.loaded())
            .cloned();

        match &selected {
            Some(backend) => {
                tracing::info!(backend = %backend.name(), "Activated storage backend");
            }
            None => {
                tracing::error!("No supported storage backend");
            }
        }

        *self.active.write() = selected.clone();
        selected
    }

    pub fn active(&self) -> Option<Arc<dyn StorageBackend>> {
        self.active.read().clone()
    }

    pub fn require_active(&self) -> Result<Arc<dyn StorageBackend>> {
        self.active().ok_or(RegistryError::NoBackendAvailable)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for BackendRegistry {
    fn clone(&self) -> Self {
        Self {
            backends: Arc::clone(&self.backends),
            active: Arc::clone(&self.active),
        }
    }
}
