//! Entity store for one namespace: its hosts, registers, requests, and
//! grants.
//!
//! All four collections form a single consistency domain guarded by one
//! `tokio::sync::RwLock`. Reads take the shared lock; every mutation takes
//! the exclusive lock, writes a [`Batch`] through the [`Backend`], and only
//! then applies the change in memory. A failed commit therefore leaves the
//! visible state untouched.
//!
//! Cancellation is honoured only while waiting for the lock. Once the lock is
//! held, the rest of the operation runs without an await point and cannot be
//! interrupted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::counts;
use crate::error::{StoreError, StoreResult};
use crate::ids::IdSequence;
use crate::labels;
use crate::persist::{Backend, Batch, RedbBackend, Snapshot};
use crate::types::*;

/// Rows of one entity kind, ordered by creation sequence.
struct Table<T> {
    rows: BTreeMap<u64, T>,
    seqs: HashMap<EntityId, u64>,
}

impl<T: Entity> Table<T> {
    fn from_rows(rows: Vec<(u64, T)>) -> Self {
        let mut table = Self {
            rows: BTreeMap::new(),
            seqs: HashMap::new(),
        };
        for (seq, entity) in rows {
            table.insert(seq, entity);
        }
        table
    }

    fn get(&self, id: &str) -> Option<&T> {
        self.seqs.get(id).and_then(|seq| self.rows.get(seq))
    }

    /// Sequence number and a copy of the entity, or `NotFound`.
    fn lookup(&self, id: &str) -> StoreResult<(u64, T)> {
        let seq = *self
            .seqs
            .get(id)
            .ok_or_else(|| StoreError::not_found(T::KIND, id))?;
        let entity = self
            .rows
            .get(&seq)
            .cloned()
            .ok_or_else(|| StoreError::not_found(T::KIND, id))?;
        Ok((seq, entity))
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    fn insert(&mut self, seq: u64, entity: T) {
        self.seqs.insert(entity.id().to_string(), seq);
        self.rows.insert(seq, entity);
    }

    fn remove(&mut self, id: &str) -> Option<T> {
        let seq = self.seqs.remove(id)?;
        self.rows.remove(&seq)
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// In-memory state of a namespace.
struct State {
    hosts: Table<Host>,
    registers: Table<Register>,
    requests: Table<Request>,
    grants: Table<Grant>,
    ids: IdSequence,
}

impl State {
    fn from_snapshot(namespace: &str, snapshot: Snapshot) -> StoreResult<Self> {
        let mut ids = IdSequence::starting_at(snapshot.next_seq);
        let all_seqs = snapshot
            .hosts
            .iter()
            .map(|(s, _)| *s)
            .chain(snapshot.registers.iter().map(|(s, _)| *s))
            .chain(snapshot.requests.iter().map(|(s, _)| *s))
            .chain(snapshot.grants.iter().map(|(s, _)| *s));
        for seq in all_seqs {
            ids.observe(seq);
        }

        let state = Self {
            hosts: Table::from_rows(snapshot.hosts),
            registers: Table::from_rows(snapshot.registers),
            requests: Table::from_rows(snapshot.requests),
            grants: Table::from_rows(snapshot.grants),
            ids,
        };
        state.check_grant_links().map_err(|reason| StoreError::Corrupt {
            namespace: namespace.to_string(),
            reason,
        })?;
        Ok(state)
    }

    /// Verify every request's `has_grant`/`grant_id` against the grants.
    fn check_grant_links(&self) -> Result<(), String> {
        let mut granted: HashSet<&str> = HashSet::new();
        for grant in self.grants.values() {
            let Some(request) = self.requests.get(&grant.request_id) else {
                // The request was deleted after being granted.
                continue;
            };
            if !granted.insert(request.id.as_str()) {
                return Err(format!("request {} has more than one grant", request.id));
            }
            if !request.has_grant || request.grant_id.as_deref() != Some(grant.id.as_str()) {
                return Err(format!(
                    "request {} does not reference its grant {}",
                    request.id, grant.id
                ));
            }
        }
        for request in self.requests.values() {
            let linked = granted.contains(request.id.as_str());
            if request.has_grant != linked || request.grant_id.is_some() != linked {
                return Err(format!("request {} has a dangling grant reference", request.id));
            }
        }
        Ok(())
    }
}

/// Entity store for a single namespace.
///
/// Shared across tasks behind an `Arc`; see [`crate::Registry`].
pub struct NamespaceStore {
    name: String,
    state: RwLock<State>,
    backend: Box<dyn Backend>,
}

impl NamespaceStore {
    /// Open (or create) the persistent store for `namespace` under `data_dir`.
    pub fn open(data_dir: &Path, namespace: &str) -> StoreResult<Self> {
        let backend = RedbBackend::open(data_dir, namespace)?;
        Self::with_backend(namespace, Box::new(backend))
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(namespace: &str) -> StoreResult<Self> {
        let backend = RedbBackend::open_in_memory(namespace)?;
        Self::with_backend(namespace, Box::new(backend))
    }

    /// Build a store over an arbitrary backend, loading its current content.
    pub fn with_backend(namespace: &str, backend: Box<dyn Backend>) -> StoreResult<Self> {
        let snapshot = backend.load()?;
        let state = State::from_snapshot(namespace, snapshot)?;
        info!(
            namespace,
            hosts = state.hosts.len(),
            registers = state.registers.len(),
            requests = state.requests.len(),
            grants = state.grants.len(),
            "namespace store loaded"
        );
        Ok(Self {
            name: namespace.to_string(),
            state: RwLock::new(state),
            backend,
        })
    }

    /// Namespace this store serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn read_state(
        &self,
        cancel: &CancellationToken,
    ) -> StoreResult<RwLockReadGuard<'_, State>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StoreError::Cancelled),
            guard = self.state.read() => Ok(guard),
        }
    }

    async fn write_state(
        &self,
        cancel: &CancellationToken,
    ) -> StoreResult<RwLockWriteGuard<'_, State>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StoreError::Cancelled),
            guard = self.state.write() => Ok(guard),
        }
    }

    /// Durably apply `batch`; the caller updates memory only on success.
    fn commit(&self, batch: &Batch, op: &'static str) -> StoreResult<()> {
        self.backend.commit(batch).inspect_err(|e| {
            error!(namespace = %self.name, op, error = %e, "commit failed, mutation dropped");
        })
    }

    // ── Hosts ──────────────────────────────────────────────────────

    pub async fn create_host(
        &self,
        cancel: &CancellationToken,
        labels: Labels,
    ) -> StoreResult<Host> {
        labels::validate(&labels)?;
        let mut state = self.write_state(cancel).await?;

        let (seq, id) = state.ids.peek(EntityKind::Host);
        let host = Host {
            id,
            labels,
            created_at: epoch_secs(),
        };
        let mut batch = Batch::new();
        batch.put(seq, &host)?;
        batch.set_next_seq(state.ids.advanced());
        self.commit(&batch, "create_host")?;

        state.ids.advance();
        state.hosts.insert(seq, host.clone());
        debug!(namespace = %self.name, id = %host.id, "host created");
        Ok(host)
    }

    pub async fn get_host(&self, cancel: &CancellationToken, id: &str) -> StoreResult<Host> {
        let state = self.read_state(cancel).await?;
        state
            .hosts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Host, id))
    }

    /// Hosts whose labels match `filter`, in creation order.
    pub async fn list_hosts(
        &self,
        cancel: &CancellationToken,
        filter: &Labels,
    ) -> StoreResult<Vec<Host>> {
        let state = self.read_state(cancel).await?;
        Ok(labels::select(state.hosts.values(), filter))
    }

    pub async fn update_host_labels(
        &self,
        cancel: &CancellationToken,
        id: &str,
        labels: Labels,
    ) -> StoreResult<Host> {
        labels::validate(&labels)?;
        let mut state = self.write_state(cancel).await?;

        let (seq, mut host) = state.hosts.lookup(id)?;
        host.labels = labels;
        let mut batch = Batch::new();
        batch.put(seq, &host)?;
        self.commit(&batch, "update_host_labels")?;

        state.hosts.insert(seq, host.clone());
        debug!(namespace = %self.name, %id, "host labels updated");
        Ok(host)
    }

    /// Delete a host. Its registers and requests are left in place.
    pub async fn delete_host(&self, cancel: &CancellationToken, id: &str) -> StoreResult<()> {
        let mut state = self.write_state(cancel).await?;

        let (seq, _) = state.hosts.lookup(id)?;
        let mut batch = Batch::new();
        batch.remove(EntityKind::Host, seq);
        self.commit(&batch, "delete_host")?;

        state.hosts.remove(id);
        debug!(namespace = %self.name, %id, "host deleted");
        Ok(())
    }

    // ── Registers ──────────────────────────────────────────────────

    pub async fn create_register(
        &self,
        cancel: &CancellationToken,
        host_id: &str,
        payload: Payload,
        labels: Labels,
    ) -> StoreResult<Register> {
        require_reference(EntityKind::Host, host_id)?;
        labels::validate(&labels)?;
        let mut state = self.write_state(cancel).await?;

        if state.hosts.get(host_id).is_none() {
            return Err(StoreError::not_found(EntityKind::Host, host_id));
        }
        let (seq, id) = state.ids.peek(EntityKind::Register);
        let now = epoch_secs();
        let register = Register {
            id,
            host_id: host_id.to_string(),
            payload,
            labels,
            created_at: now,
            updated_at: now,
        };
        let mut batch = Batch::new();
        batch.put(seq, &register)?;
        batch.set_next_seq(state.ids.advanced());
        self.commit(&batch, "create_register")?;

        state.ids.advance();
        state.registers.insert(seq, register.clone());
        debug!(namespace = %self.name, id = %register.id, host_id, "register created");
        Ok(register)
    }

    pub async fn get_register(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> StoreResult<Register> {
        let state = self.read_state(cancel).await?;
        state
            .registers
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Register, id))
    }

    /// Registers whose labels match `filter`, in creation order.
    pub async fn list_registers(
        &self,
        cancel: &CancellationToken,
        filter: &Labels,
    ) -> StoreResult<Vec<Register>> {
        let state = self.read_state(cancel).await?;
        Ok(labels::select(state.registers.values(), filter))
    }

    pub async fn update_register_labels(
        &self,
        cancel: &CancellationToken,
        id: &str,
        labels: Labels,
    ) -> StoreResult<Register> {
        labels::validate(&labels)?;
        let mut state = self.write_state(cancel).await?;

        let (seq, mut register) = state.registers.lookup(id)?;
        register.labels = labels;
        register.updated_at = epoch_secs();
        let mut batch = Batch::new();
        batch.put(seq, &register)?;
        self.commit(&batch, "update_register_labels")?;

        state.registers.insert(seq, register.clone());
        debug!(namespace = %self.name, %id, "register labels updated");
        Ok(register)
    }

    pub async fn delete_register(&self, cancel: &CancellationToken, id: &str) -> StoreResult<()> {
        let mut state = self.write_state(cancel).await?;

        let (seq, _) = state.registers.lookup(id)?;
        let mut batch = Batch::new();
        batch.remove(EntityKind::Register, seq);
        self.commit(&batch, "delete_register")?;

        state.registers.remove(id);
        debug!(namespace = %self.name, %id, "register deleted");
        Ok(())
    }

    // ── Requests ───────────────────────────────────────────────────

    pub async fn create_request(
        &self,
        cancel: &CancellationToken,
        host_id: &str,
        payload: Payload,
        labels: Labels,
    ) -> StoreResult<Request> {
        require_reference(EntityKind::Host, host_id)?;
        labels::validate(&labels)?;
        let mut state = self.write_state(cancel).await?;

        if state.hosts.get(host_id).is_none() {
            return Err(StoreError::not_found(EntityKind::Host, host_id));
        }
        let (seq, id) = state.ids.peek(EntityKind::Request);
        let now = epoch_secs();
        let request = Request {
            id,
            host_id: host_id.to_string(),
            payload,
            labels,
            has_grant: false,
            grant_id: None,
            created_at: now,
            updated_at: now,
        };
        let mut batch = Batch::new();
        batch.put(seq, &request)?;
        batch.set_next_seq(state.ids.advanced());
        self.commit(&batch, "create_request")?;

        state.ids.advance();
        state.requests.insert(seq, request.clone());
        debug!(namespace = %self.name, id = %request.id, host_id, "request created");
        Ok(request)
    }

    pub async fn get_request(&self, cancel: &CancellationToken, id: &str) -> StoreResult<Request> {
        let state = self.read_state(cancel).await?;
        state
            .requests
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Request, id))
    }

    /// A request and its grant, if any, from one consistent read.
    pub async fn get_request_with_grant(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> StoreResult<RequestView> {
        let state = self.read_state(cancel).await?;
        let request = state
            .requests
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Request, id))?;
        let grant = request
            .grant_id
            .as_deref()
            .and_then(|grant_id| state.grants.get(grant_id))
            .cloned();
        Ok(RequestView { request, grant })
    }

    /// Requests whose labels match `filter`, in creation order.
    pub async fn list_requests(
        &self,
        cancel: &CancellationToken,
        filter: &Labels,
    ) -> StoreResult<Vec<Request>> {
        let state = self.read_state(cancel).await?;
        Ok(labels::select(state.requests.values(), filter))
    }

    pub async fn update_request_labels(
        &self,
        cancel: &CancellationToken,
        id: &str,
        labels: Labels,
    ) -> StoreResult<Request> {
        labels::validate(&labels)?;
        let mut state = self.write_state(cancel).await?;

        let (seq, mut request) = state.requests.lookup(id)?;
        request.labels = labels;
        request.updated_at = epoch_secs();
        let mut batch = Batch::new();
        batch.put(seq, &request)?;
        self.commit(&batch, "update_request_labels")?;

        state.requests.insert(seq, request.clone());
        debug!(namespace = %self.name, %id, "request labels updated");
        Ok(request)
    }

    /// Delete a request. A grant issued for it stays readable by id.
    pub async fn delete_request(&self, cancel: &CancellationToken, id: &str) -> StoreResult<()> {
        let mut state = self.write_state(cancel).await?;

        let (seq, _) = state.requests.lookup(id)?;
        let mut batch = Batch::new();
        batch.remove(EntityKind::Request, seq);
        self.commit(&batch, "delete_request")?;

        state.requests.remove(id);
        debug!(namespace = %self.name, %id, "request deleted");
        Ok(())
    }

    // ── Grants ─────────────────────────────────────────────────────

    /// Grant a request. Fails with `Conflict` if the request already has a
    /// grant; the grant and the request's `has_grant`/`grant_id` are written
    /// in one commit.
    pub async fn create_grant(
        &self,
        cancel: &CancellationToken,
        request_id: &str,
        payload: GrantPayload,
    ) -> StoreResult<Grant> {
        require_reference(EntityKind::Request, request_id)?;
        let mut state = self.write_state(cancel).await?;

        let (request_seq, mut request) = state.requests.lookup(request_id)?;
        if let Some(existing) = &request.grant_id {
            warn!(
                namespace = %self.name,
                request_id,
                grant_id = %existing,
                "request already granted"
            );
            return Err(StoreError::Conflict(format!(
                "request {request_id} already has grant {existing}"
            )));
        }

        let (seq, id) = state.ids.peek(EntityKind::Grant);
        let now = epoch_secs();
        let grant = Grant {
            id,
            request_id: request_id.to_string(),
            payload,
            created_at: now,
            updated_at: now,
        };
        request.has_grant = true;
        request.grant_id = Some(grant.id.clone());
        request.updated_at = now;

        let mut batch = Batch::new();
        batch.put(seq, &grant)?;
        batch.put(request_seq, &request)?;
        batch.set_next_seq(state.ids.advanced());
        self.commit(&batch, "create_grant")?;

        state.ids.advance();
        state.grants.insert(seq, grant.clone());
        state.requests.insert(request_seq, request);
        debug!(namespace = %self.name, id = %grant.id, request_id, "grant created");
        Ok(grant)
    }

    pub async fn get_grant(&self, cancel: &CancellationToken, id: &str) -> StoreResult<Grant> {
        let state = self.read_state(cancel).await?;
        state
            .grants
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Grant, id))
    }

    /// All grants, in creation order.
    pub async fn list_grants(&self, cancel: &CancellationToken) -> StoreResult<Vec<Grant>> {
        let state = self.read_state(cancel).await?;
        Ok(state.grants.values().cloned().collect())
    }

    /// Delete a grant and clear the owning request's grant fields, if that
    /// request still exists.
    pub async fn delete_grant(&self, cancel: &CancellationToken, id: &str) -> StoreResult<()> {
        let mut state = self.write_state(cancel).await?;

        let (seq, grant) = state.grants.lookup(id)?;
        let mut batch = Batch::new();
        batch.remove(EntityKind::Grant, seq);
        let cleared = match state.requests.lookup(&grant.request_id) {
            Ok((request_seq, mut request)) if request.grant_id.as_deref() == Some(id) => {
                request.has_grant = false;
                request.grant_id = None;
                request.updated_at = epoch_secs();
                batch.put(request_seq, &request)?;
                Some((request_seq, request))
            }
            _ => None,
        };
        self.commit(&batch, "delete_grant")?;

        state.grants.remove(id);
        if let Some((request_seq, request)) = cleared {
            state.requests.insert(request_seq, request);
        }
        debug!(namespace = %self.name, %id, request_id = %grant.request_id, "grant deleted");
        Ok(())
    }

    // ── Counts ─────────────────────────────────────────────────────

    pub async fn count_requests_by_grant_presence(
        &self,
        cancel: &CancellationToken,
    ) -> StoreResult<RequestCounts> {
        let state = self.read_state(cancel).await?;
        Ok(counts::requests_by_grant_presence(
            state.requests.values(),
            state.grants.values(),
        ))
    }

    pub async fn count_registers(&self, cancel: &CancellationToken) -> StoreResult<TotalCount> {
        let state = self.read_state(cancel).await?;
        Ok(counts::total(state.registers.values()))
    }

    pub async fn count_grants(&self, cancel: &CancellationToken) -> StoreResult<TotalCount> {
        let state = self.read_state(cancel).await?;
        Ok(counts::total(state.grants.values()))
    }

    /// Counts and full listings for a summary page, from one consistent read.
    pub async fn index_snapshot(&self, cancel: &CancellationToken) -> StoreResult<IndexSnapshot> {
        let state = self.read_state(cancel).await?;
        Ok(IndexSnapshot {
            namespace: self.name.clone(),
            requests: counts::requests_by_grant_presence(
                state.requests.values(),
                state.grants.values(),
            ),
            registers_total: counts::total(state.registers.values()).total,
            grants_total: counts::total(state.grants.values()).total,
            hosts: state.hosts.values().cloned().collect(),
            register_list: state.registers.values().cloned().collect(),
            request_list: state.requests.values().cloned().collect(),
            grant_list: state.grants.values().cloned().collect(),
        })
    }
}

fn require_reference(kind: EntityKind, id: &str) -> StoreResult<()> {
    if id.trim().is_empty() {
        return Err(StoreError::InvalidInput(format!("{kind} id is required")));
    }
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
