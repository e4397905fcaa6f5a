//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use codebox_registry::DiagnosticOverrides;
use codebox_storage::DEFAULT_QUOTA_BYTES;

use crate::error::CoreError;
use crate::Result;

pub const DEFAULT_TIPS_URL: &str =
    "https://raw.githubusercontent.com/remix-project-org/remix-dynamics/main/ide/tips.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for persisted data
    pub data_dir: PathBuf,
    /// SQLite file of the indexed backend
    pub indexed_db_path: PathBuf,
    /// JSON file of the key-value backend
    pub key_value_path: PathBuf,
    pub key_value_quota_bytes: usize,
    /// Migrate legacy data without asking about a backup
    pub auto_migrate: bool,
    /// Running inside the desktop shell, which manages its own storage
    pub desktop_shell: bool,
    /// Source of the loading-screen tips; `None` disables the fetch
    pub tips_url: Option<String>,
    pub diagnostics: DiagnosticOverrides,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            indexed_db_path: data_dir.join("codebox.db"),
            key_value_path: data_dir.join("keyvalue.json"),
            data_dir,
            key_value_quota_bytes: DEFAULT_QUOTA_BYTES,
            auto_migrate: false,
            desktop_shell: false,
            tips_url: Some(DEFAULT_TIPS_URL.to_string()),
            diagnostics: DiagnosticOverrides::none(),
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("CodeBox"))
            .unwrap_or_else(|| PathBuf::from(".codebox"))
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;

        tracing::debug!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// Take diagnostic overrides from the page URL.
    pub fn with_page_url(mut self, page_url: &str) -> Self {
        self.diagnostics = DiagnosticOverrides::from_url(page_url);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_value_quota_bytes == 0 {
            return Err(CoreError::Config(
                "key_value_quota_bytes must be greater than zero".to_string(),
            ));
        }
        if self.indexed_db_path == self.key_value_path {
            return Err(CoreError::Config(
                "indexed and key-value backends need distinct paths".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
