//! Data model for the pgoutput decoder (spec §3).

use serde::Serialize;

use crate::codec::Cell;

/// Column descriptor carried on a `Relation` message.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
    /// Whether the column participates in the primary key / replica identity.
    pub is_key: bool,
}

/// A table's schema as discovered from a `Relation` message. Immutable for
/// the lifetime of a given id within a session; a later `Relation` for the
/// same id replaces the stored descriptor wholesale (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct RelationInfo {
    pub id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: u8,
    pub columns: Vec<ColumnInfo>,
}

/// Which kind of prior image an UPDATE/DELETE carries, per the tag byte
/// preceding the tuple (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorImageKind {
    /// `'K'` — only replica-identity columns are present.
    Key,
    /// `'O'` — the full old row, only sent when replica identity is FULL.
    Old,
}

/// One fully parsed `pgoutput` protocol frame (spec §4.B).
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Begin {
        final_lsn: i64,
        commit_time: i64,
        xid: i32,
    },
    Commit {
        flags: u8,
        commit_lsn: i64,
        end_lsn: i64,
        commit_time: i64,
    },
    Origin {
        commit_lsn: i64,
        name: String,
    },
    Relation {
        relation: RelationInfo,
    },
    Type {
        id: u32,
        namespace: String,
        name: String,
    },
    Insert {
        relation_id: u32,
        new_row: Vec<Cell>,
    },
    Update {
        relation_id: u32,
        key_or_old_row: Option<(PriorImageKind, Vec<Cell>)>,
        new_row: Vec<Cell>,
    },
    Delete {
        relation_id: u32,
        key_or_old_row: (PriorImageKind, Vec<Cell>),
    },
    Truncate {
        relation_ids: Vec<u32>,
        options: u8,
    },
}

/// The event kind delivered to the user handler (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Ready,
    Insert,
    Update,
    Delete,
}
