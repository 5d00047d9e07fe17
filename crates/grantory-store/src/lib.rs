//! grantory-store: namespace-scoped entity store for Grantory.
//!
//! Hosts advertise resources through registers, ask for resources through
//! requests, and an external authority approves a request by creating a
//! grant. Every namespace holds its own four collections in a
//! [`NamespaceStore`]; the [`Registry`] hands out one store per namespace.
//!
//! # Architecture
//!
//! Each namespace is persisted in its own redb database at
//! `<data_dir>/<namespace>/store.redb`, one table per entity kind, with
//! entities JSON-serialized into `&[u8]` value columns. Rows are keyed by a
//! per-namespace sequence number, which keeps listings in creation order.
//! Grant payloads are raw bytes, carried as base64 inside the row.
//!
//! The entity-kind level of the data directory is a table, not a file. One
//! database per namespace lets a grant and its request land in the same
//! commit. The cost is that a damaged `store.redb` makes all four collections
//! of that namespace fail to load together; other namespaces are unaffected.
//!
//! A request's `has_grant`/`grant_id` are derived from the grants collection
//! and are written in the same commit as the grant that changes them, under
//! the namespace's exclusive lock.

pub mod config;
pub mod counts;
pub mod error;
pub mod ids;
pub mod labels;
pub mod payload;
pub mod persist;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use config::StoreConfig;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use payload::parse_document;
pub use registry::{Registry, validate_namespace};
pub use store::NamespaceStore;
pub use tokio_util::sync::CancellationToken;
pub use types::*;
