//! Durable storage of a namespace's collections, backed by redb.
//!
//! Each namespace owns one database at `<data_dir>/<namespace>/store.redb`
//! with one table per entity kind. Mutations are written as a [`Batch`]
//! inside a single write transaction, so a commit either lands completely
//! or not at all, and a failed write to one table never leaves another
//! half-updated.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, StorageError};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::{self, META, NEXT_SEQ_KEY};
use crate::types::{Entity, EntityKind, Grant, Host, Register, Request};

/// File name of the per-namespace database.
pub const STORE_FILE: &str = "store.redb";

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Everything persisted for one namespace, in insertion order.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub hosts: Vec<(u64, Host)>,
    pub registers: Vec<(u64, Register)>,
    pub requests: Vec<(u64, Request)>,
    pub grants: Vec<(u64, Grant)>,
    /// Next unused identifier sequence number.
    pub next_seq: u64,
}

/// One row-level change inside a [`Batch`].
#[derive(Debug, Clone)]
pub enum Change {
    Put {
        kind: EntityKind,
        seq: u64,
        value: Vec<u8>,
    },
    Remove {
        kind: EntityKind,
        seq: u64,
    },
}

/// A set of changes committed atomically.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    changes: Vec<Change>,
    next_seq: Option<u64>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert-or-replace of `entity` under `seq`.
    pub fn put<T: Entity>(&mut self, seq: u64, entity: &T) -> StoreResult<()> {
        let value = serde_json::to_vec(entity).map_err(map_err!(Persistence))?;
        self.changes.push(Change::Put {
            kind: T::KIND,
            seq,
            value,
        });
        Ok(())
    }

    /// Queue removal of the row stored under `seq`.
    pub fn remove(&mut self, kind: EntityKind, seq: u64) {
        self.changes.push(Change::Remove { kind, seq });
    }

    /// Record the advanced identifier sequence.
    pub fn set_next_seq(&mut self, next_seq: u64) {
        self.next_seq = Some(next_seq);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn next_seq(&self) -> Option<u64> {
        self.next_seq
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.next_seq.is_none()
    }
}

/// Durable storage for a single namespace.
pub trait Backend: Send + Sync {
    /// Read the full persisted state. Content that cannot be decoded is
    /// reported as [`StoreError::Corrupt`].
    fn load(&self) -> StoreResult<Snapshot>;

    /// Apply `batch` atomically and durably.
    fn commit(&self, batch: &Batch) -> StoreResult<()>;
}

/// redb-backed namespace storage.
#[derive(Clone)]
pub struct RedbBackend {
    namespace: String,
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) the database for `namespace` under `data_dir`.
    ///
    /// A missing namespace directory is created and starts empty.
    pub fn open(data_dir: &Path, namespace: &str) -> StoreResult<Self> {
        let dir = namespace_dir(data_dir, namespace);
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Persistence(format!("create {}: {e}", dir.display()))
        })?;
        let path = dir.join(STORE_FILE);
        let db = Database::create(&path)
            .map_err(|e| open_error(namespace, format!("open {}: {e}", path.display()), e))?;
        let backend = Self {
            namespace: namespace.to_string(),
            db: Arc::new(db),
        };
        backend.ensure_tables()?;
        debug!(?path, namespace, "namespace database opened");
        Ok(backend)
    }

    /// Create an ephemeral in-memory database (for testing).
    pub fn open_in_memory(namespace: &str) -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Persistence))?;
        let backend = Self {
            namespace: namespace.to_string(),
            db: Arc::new(db),
        };
        backend.ensure_tables()?;
        debug!(namespace, "in-memory namespace database opened");
        Ok(backend)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Persistence))?;
        // Opening a table in a write transaction creates it if absent.
        for kind in EntityKind::ALL {
            txn.open_table(tables::for_kind(kind))
                .map_err(map_err!(Persistence))?;
        }
        txn.open_table(META).map_err(map_err!(Persistence))?;
        txn.commit().map_err(map_err!(Persistence))?;
        Ok(())
    }

    fn corrupt(&self, reason: impl std::fmt::Display) -> StoreError {
        StoreError::Corrupt {
            namespace: self.namespace.clone(),
            reason: reason.to_string(),
        }
    }

    fn load_kind<T: Entity>(&self, txn: &redb::ReadTransaction) -> StoreResult<Vec<(u64, T)>> {
        let table = txn
            .open_table(tables::for_kind(T::KIND))
            .map_err(|e| self.corrupt(e))?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(|e| self.corrupt(e))? {
            let (key, value) = entry.map_err(|e| self.corrupt(e))?;
            let seq = key.value();
            let entity: T = serde_json::from_slice(value.value())
                .map_err(|e| self.corrupt(format!("{} row {seq}: {e}", T::KIND.collection())))?;
            rows.push((seq, entity));
        }
        Ok(rows)
    }
}

impl Backend for RedbBackend {
    fn load(&self) -> StoreResult<Snapshot> {
        let txn = self.db.begin_read().map_err(|e| self.corrupt(e))?;
        let next_seq = {
            let meta = txn.open_table(META).map_err(|e| self.corrupt(e))?;
            meta.get(NEXT_SEQ_KEY)
                .map_err(|e| self.corrupt(e))?
                .map(|guard| guard.value())
                .unwrap_or(1)
        };
        Ok(Snapshot {
            hosts: self.load_kind(&txn)?,
            registers: self.load_kind(&txn)?,
            requests: self.load_kind(&txn)?,
            grants: self.load_kind(&txn)?,
            next_seq,
        })
    }

    fn commit(&self, batch: &Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(map_err!(Persistence))?;
        for change in batch.changes() {
            match change {
                Change::Put { kind, seq, value } => {
                    let mut table = txn
                        .open_table(tables::for_kind(*kind))
                        .map_err(map_err!(Persistence))?;
                    table
                        .insert(*seq, value.as_slice())
                        .map_err(map_err!(Persistence))?;
                }
                Change::Remove { kind, seq } => {
                    let mut table = txn
                        .open_table(tables::for_kind(*kind))
                        .map_err(map_err!(Persistence))?;
                    table.remove(*seq).map_err(map_err!(Persistence))?;
                }
            }
        }
        if let Some(next_seq) = batch.next_seq() {
            let mut meta = txn.open_table(META).map_err(map_err!(Persistence))?;
            meta.insert(NEXT_SEQ_KEY, next_seq)
                .map_err(map_err!(Persistence))?;
        }
        // Dropping an uncommitted transaction aborts it.
        txn.commit().map_err(map_err!(Persistence))?;
        Ok(())
    }
}

/// Classify a failed database open: unreadable content is `Corrupt`, anything
/// environmental (permissions, lock held elsewhere) is `Persistence`.
fn open_error(namespace: &str, reason: String, err: DatabaseError) -> StoreError {
    let corrupt = match &err {
        DatabaseError::Storage(StorageError::Corrupted(_)) => true,
        // A file shorter than its header is truncated content.
        DatabaseError::Storage(StorageError::Io(io)) => matches!(
            io.kind(),
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData
        ),
        _ => false,
    };
    if corrupt {
        StoreError::Corrupt {
            namespace: namespace.to_string(),
            reason,
        }
    } else {
        StoreError::Persistence(reason)
    }
}

/// Directory holding a namespace's database.
pub fn namespace_dir(data_dir: &Path, namespace: &str) -> PathBuf {
    data_dir.join(namespace)
}
