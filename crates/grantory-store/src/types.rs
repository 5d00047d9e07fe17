//! Domain types for the Grantory entity store.
//!
//! These types represent the persisted state of hosts, registers, requests,
//! and grants within one namespace. All types are serializable to/from JSON
//! for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque identifier assigned by the store (unique within a namespace).
pub type EntityId = String;

/// Free-form key/value tags. Key order carries no meaning.
pub type Labels = BTreeMap<String, String>;

/// Opaque structured document. `None` is an absent payload, which is kept
/// distinct from an explicit empty document such as `{}` or `null`.
pub type Payload = Option<serde_json::Value>;

/// Raw grant delivery bytes, stored byte-for-byte. `Some(vec![])` is an
/// explicit empty payload and is kept distinct from `None`.
pub type GrantPayload = Option<Vec<u8>>;

/// Deserialize a present payload field as `Some`, even when it is `null`.
fn present<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Grant payload bytes as a standard base64 string inside the JSON row.
mod grant_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map(Some).map_err(D::Error::custom)
    }
}

// ── Entity kinds ───────────────────────────────────────────────────

/// The four collections held by a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Host,
    Register,
    Request,
    Grant,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [Self::Host, Self::Register, Self::Request, Self::Grant];

    /// Collection name, used for the redb table of this kind.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Host => "hosts",
            Self::Register => "registers",
            Self::Request => "requests",
            Self::Grant => "grants",
        }
    }

    /// Prefix of identifiers minted for this kind.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Register => "reg",
            Self::Request => "req",
            Self::Grant => "grant",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Host => "host",
            Self::Register => "register",
            Self::Request => "request",
            Self::Grant => "grant",
        };
        f.write_str(name)
    }
}

/// Common view over stored entities.
pub trait Entity: Clone + Serialize + for<'de> Deserialize<'de> {
    const KIND: EntityKind;

    fn id(&self) -> &str;
}

/// Entities that carry labels and can be filtered by them.
pub trait Labeled {
    fn labels(&self) -> &Labels;
}

// ── Host ──────────────────────────────────────────────────────────

/// A registered participant that owns registers and requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: EntityId,
    #[serde(default)]
    pub labels: Labels,
    /// Unix timestamp (seconds) when this host was created.
    pub created_at: u64,
}

// ── Register ──────────────────────────────────────────────────────

/// An advertisement of an available resource, owned by a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Register {
    pub id: EntityId,
    pub host_id: EntityId,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub payload: Payload,
    #[serde(default)]
    pub labels: Labels,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Request ───────────────────────────────────────────────────────

/// A want for a resource, optionally fulfilled by a grant.
///
/// `has_grant` and `grant_id` are derived from the grants collection and are
/// only ever written by the store itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: EntityId,
    pub host_id: EntityId,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub payload: Payload,
    #[serde(default)]
    pub labels: Labels,
    pub has_grant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<EntityId>,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Grant ─────────────────────────────────────────────────────────

/// The approval outcome for exactly one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grant {
    pub id: EntityId,
    pub request_id: EntityId,
    /// Delivery payload (credential, configuration blob, ...).
    #[serde(default, with = "grant_bytes", skip_serializing_if = "Option::is_none")]
    pub payload: GrantPayload,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A request together with the grant that fulfils it, read under one lock.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RequestView {
    pub request: Request,
    pub grant: Option<Grant>,
}

// ── Counts ────────────────────────────────────────────────────────

/// Requests partitioned by whether a grant exists for them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestCounts {
    pub with_grant: u64,
    pub without_grant: u64,
}

impl RequestCounts {
    pub fn total(&self) -> u64 {
        self.with_grant + self.without_grant
    }
}

/// A plain collection total.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TotalCount {
    pub total: u64,
}

/// Everything a namespace summary page shows, read under one lock.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IndexSnapshot {
    pub namespace: String,
    pub requests: RequestCounts,
    pub registers_total: u64,
    pub grants_total: u64,
    pub hosts: Vec<Host>,
    pub register_list: Vec<Register>,
    pub request_list: Vec<Request>,
    pub grant_list: Vec<Grant>,
}

// ── Trait impls ───────────────────────────────────────────────────

macro_rules! impl_entity {
    ($ty:ty, $kind:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

impl_entity!(Host, EntityKind::Host);
impl_entity!(Register, EntityKind::Register);
impl_entity!(Request, EntityKind::Request);
impl_entity!(Grant, EntityKind::Grant);

impl Labeled for Host {
    fn labels(&self) -> &Labels {
        &self.labels
    }
}

impl Labeled for Register {
    fn labels(&self) -> &Labels {
        &self.labels
    }
}

impl Labeled for Request {
    fn labels(&self) -> &Labels {
        &self.labels
    }
}
