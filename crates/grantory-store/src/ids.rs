//! Identifier minting.
//!
//! Every entity in a namespace draws from one monotonically increasing
//! sequence. The sequence number doubles as the row key in the entity's
//! table, and the advanced counter is persisted in the same commit as the
//! entity, so identifiers are never handed out twice.

use crate::types::EntityKind;

/// Per-namespace identifier sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSequence {
    next: u64,
}

impl IdSequence {
    pub fn starting_at(next: u64) -> Self {
        Self { next: next.max(1) }
    }

    /// Peek the next sequence number and identifier without consuming them.
    pub fn peek(&self, kind: EntityKind) -> (u64, String) {
        (self.next, format_id(kind, self.next))
    }

    /// Value the sequence holds once the peeked number is consumed.
    pub fn advanced(&self) -> u64 {
        self.next + 1
    }

    /// Consume the peeked number (after it was durably recorded).
    pub fn advance(&mut self) {
        self.next += 1;
    }

    /// Never mint below `seq`; used when loading rows written earlier.
    pub fn observe(&mut self, seq: u64) {
        if seq >= self.next {
            self.next = seq + 1;
        }
    }
}

fn format_id(kind: EntityKind, seq: u64) -> String {
    format!("{}-{seq:06}", kind.id_prefix())
}
