//! Store configuration, read from a TOML document.
//!
//! ```toml
//! data_dir = "/var/lib/grantory"
//! default_namespace = "default"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::registry::validate_namespace;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory; each namespace gets a subdirectory.
    pub data_dir: PathBuf,
    /// Namespace used when a caller does not name one.
    pub default_namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            default_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::InvalidInput(format!("read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| StoreError::InvalidInput(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StoreError::InvalidInput("data_dir must not be empty".to_string()));
        }
        validate_namespace(&self.default_namespace)
    }
}
