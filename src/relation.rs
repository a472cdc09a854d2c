//! Relation set — in-memory catalogue of table schemas (spec §4.C).

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::codec::{self, Cell, TypedValue};
use crate::errors::{ReplicationError, Result};
use crate::types::RelationInfo;

/// Maps relation id to its most recently observed schema. Mutated only by
/// the session loop on receiving a `Relation` message (spec §3).
#[derive(Debug, Default)]
pub struct RelationSet {
    relations: HashMap<u32, RelationInfo>,
}

impl RelationSet {
    pub fn new() -> Self {
        Self {
            relations: HashMap::new(),
        }
    }

    /// Inserts or overwrites the relation by id (schema evolution).
    pub fn add(&mut self, relation: RelationInfo) {
        self.relations.insert(relation.id, relation);
    }

    pub fn get(&self, id: u32) -> Option<&RelationInfo> {
        self.relations.get(&id)
    }

    /// `(schema, table)` for a known relation id.
    pub fn assist(&self, id: u32) -> Result<(&str, &str)> {
        let relation = self
            .relations
            .get(&id)
            .ok_or_else(|| ReplicationError::unknown_relation(id))?;
        Ok((relation.namespace.as_str(), relation.name.as_str()))
    }

    /// Zips a decoded tuple's cells with the stored column descriptors,
    /// invoking the codec per cell. Unchanged-TOAST cells are omitted from
    /// the result (spec §4.C) since the caller cannot know their value.
    pub fn values(&self, id: u32, cells: &[Cell]) -> Result<IndexMap<String, TypedValue>> {
        let relation = self
            .relations
            .get(&id)
            .ok_or_else(|| ReplicationError::unknown_relation(id))?;

        if cells.len() != relation.columns.len() {
            return Err(ReplicationError::arity_mismatch(
                relation.columns.len(),
                cells.len(),
            ));
        }

        let mut out = IndexMap::with_capacity(cells.len());
        for (column, cell) in relation.columns.iter().zip(cells.iter()) {
            if matches!(cell, Cell::UnchangedToast) {
                continue;
            }
            let value = codec::decode_typed(column.type_oid, cell)?;
            out.insert(column.name.clone(), value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnInfo;

    fn relation(id: u32) -> RelationInfo {
        RelationInfo {
            id,
            namespace: "public".to_string(),
            name: "t".to_string(),
            replica_identity: b'd',
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    type_oid: codec::oid::INT4,
                    type_modifier: -1,
                    is_key: true,
                },
                ColumnInfo {
                    name: "name".to_string(),
                    type_oid: codec::oid::TEXT,
                    type_modifier: -1,
                    is_key: false,
                },
            ],
        }
    }

    #[test]
    fn unknown_relation_fails_assist_and_values() {
        let set = RelationSet::new();
        assert!(set.assist(1).is_err());
        assert!(set.values(1, &[]).is_err());
    }

    #[test]
    fn replaces_descriptor_on_re_add() {
        let mut set = RelationSet::new();
        set.add(relation(1));
        let mut updated = relation(1);
        updated.name = "renamed".to_string();
        set.add(updated);
        assert_eq!(set.get(1).unwrap().name, "renamed");
    }

    #[test]
    fn values_zips_cells_with_columns() {
        let mut set = RelationSet::new();
        set.add(relation(1));
        let cells = vec![Cell::Text(b"1".to_vec()), Cell::Text(b"abc".to_vec())];
        let values = set.values(1, &cells).unwrap();
        assert_eq!(values.get("id"), Some(&TypedValue::I32(1)));
        assert_eq!(values.get("name"), Some(&TypedValue::Text("abc".to_string())));
    }

    #[test]
    fn unchanged_toast_cells_are_omitted() {
        let mut set = RelationSet::new();
        set.add(relation(1));
        let cells = vec![Cell::Text(b"1".to_vec()), Cell::UnchangedToast];
        let values = set.values(1, &cells).unwrap();
        assert!(values.contains_key("id"));
        assert!(!values.contains_key("name"));
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let mut set = RelationSet::new();
        set.add(relation(1));
        let cells = vec![Cell::Text(b"1".to_vec())];
        assert!(set.values(1, &cells).is_err());
    }
}
