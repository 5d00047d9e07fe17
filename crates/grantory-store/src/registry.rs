//! Process-wide map from namespace name to [`NamespaceStore`].
//!
//! Stores are opened lazily on first access and cached for the life of the
//! registry. Each name has its own open gate: concurrent first access to one
//! name opens the namespace exactly once, while lookups and opens of other
//! names proceed without waiting on it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::persist::STORE_FILE;
use crate::store::NamespaceStore;

const MAX_NAMESPACE_LEN: usize = 63;

/// Reject namespace names that are not safe as a directory name.
pub fn validate_namespace(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidInput(format!("namespace {name:?} {reason}"));
    if name.is_empty() {
        return Err(invalid("is empty"));
    }
    if name.len() > MAX_NAMESPACE_LEN {
        return Err(invalid("is too long"));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("contains characters outside [A-Za-z0-9_.-]"));
    }
    Ok(())
}

/// Registry of namespace stores sharing one data directory.
pub struct Registry {
    data_dir: PathBuf,
    stores: RwLock<HashMap<String, Arc<NamespaceStore>>>,
    /// Per-name locks serializing the first open of each namespace.
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Registry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            stores: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self::new(config.data_dir.clone()))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Return the store for `namespace`, opening it on first access.
    ///
    /// A namespace whose persisted content cannot be loaded fails with
    /// [`StoreError::Corrupt`] and is not cached.
    pub fn get_or_create(&self, namespace: &str) -> StoreResult<Arc<NamespaceStore>> {
        validate_namespace(namespace)?;
        if let Some(store) = self.cached(namespace) {
            return Ok(store);
        }

        let gate = self.gate(namespace);
        let _opening = gate.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have opened it while we waited.
        if let Some(store) = self.cached(namespace) {
            return Ok(store);
        }
        let store = Arc::new(NamespaceStore::open(&self.data_dir, namespace)?);
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string(), Arc::clone(&store));
        info!(namespace, data_dir = ?self.data_dir, "namespace opened");
        Ok(store)
    }

    fn cached(&self, namespace: &str) -> Option<Arc<NamespaceStore>> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.get(namespace).map(Arc::clone)
    }

    fn gate(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(namespace.to_string()).or_default())
    }

    /// Names of namespaces opened in this process or present on disk, sorted.
    pub fn list_namespaces(&self) -> StoreResult<Vec<String>> {
        let mut names: BTreeSet<String> = {
            let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
            stores.keys().cloned().collect()
        };

        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(names.into_iter().collect());
            }
            Err(e) => {
                return Err(StoreError::Persistence(format!(
                    "read {}: {e}",
                    self.data_dir.display()
                )));
            }
        };
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Persistence(e.to_string()))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_namespace(&name).is_ok() && entry.path().join(STORE_FILE).is_file() {
                names.insert(name);
            }
        }
        Ok(names.into_iter().collect())
    }
}
