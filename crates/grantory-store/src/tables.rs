//! redb table definitions for a namespace database.
//!
//! Entity tables use `u64` keys (the creation sequence number, so iteration
//! yields insertion order) and `&[u8]` values (JSON-serialized entities).

use redb::TableDefinition;

use crate::types::EntityKind;

/// Hosts keyed by creation sequence.
pub const HOSTS: TableDefinition<u64, &[u8]> = TableDefinition::new("hosts");

/// Registers keyed by creation sequence.
pub const REGISTERS: TableDefinition<u64, &[u8]> = TableDefinition::new("registers");

/// Requests keyed by creation sequence.
pub const REQUESTS: TableDefinition<u64, &[u8]> = TableDefinition::new("requests");

/// Grants keyed by creation sequence.
pub const GRANTS: TableDefinition<u64, &[u8]> = TableDefinition::new("grants");

/// Store metadata keyed by name.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Next value of the identifier sequence.
pub const NEXT_SEQ_KEY: &str = "next_seq";

/// Table holding the given entity kind.
pub fn for_kind(kind: EntityKind) -> TableDefinition<'static, u64, &'static [u8]> {
    match kind {
        EntityKind::Host => HOSTS,
        EntityKind::Register => REGISTERS,
        EntityKind::Request => REQUESTS,
        EntityKind::Grant => GRANTS,
    }
}
