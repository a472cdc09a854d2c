//! Event dumper — combines a decoded row message with the catalogue into
//! a `ReplicationMessage` delivered to the user handler (spec §4.D).

use indexmap::IndexMap;
use tracing::warn;

use crate::codec::{Cell, TypedValue};
use crate::errors::Result;
use crate::relation::RelationSet;
use crate::types::EventKind;

/// The event handed to the user handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationMessage {
    pub kind: EventKind,
    pub schema: String,
    pub table: String,
    pub body: IndexMap<String, TypedValue>,
    /// Column names whose value differs from the prior image (updates only).
    pub columns: Vec<String>,
}

pub struct EventDumper;

impl EventDumper {
    /// Builds a `ReplicationMessage` for an INSERT: no prior image exists,
    /// so `columns` is always empty.
    pub fn dump_insert(
        relation_id: u32,
        new_row: &[Cell],
        relations: &RelationSet,
    ) -> Result<ReplicationMessage> {
        let (schema, table) = relations.assist(relation_id)?;
        let body = relations.values(relation_id, new_row)?;

        Ok(ReplicationMessage {
            kind: EventKind::Insert,
            schema: schema.to_string(),
            table: table.to_string(),
            body,
            columns: Vec::new(),
        })
    }

    /// Builds a `ReplicationMessage` for an UPDATE. `prior_row` is the
    /// key-only or full-old-row tuple, when the server sent one.
    pub fn dump_update(
        relation_id: u32,
        prior_row: Option<&[Cell]>,
        new_row: &[Cell],
        relations: &RelationSet,
    ) -> Result<ReplicationMessage> {
        let (schema, table) = relations.assist(relation_id)?;
        let body = relations.values(relation_id, new_row)?;
        let columns = Self::changed_columns(relation_id, prior_row, &body, relations);

        Ok(ReplicationMessage {
            kind: EventKind::Update,
            schema: schema.to_string(),
            table: table.to_string(),
            body,
            columns,
        })
    }

    /// Builds a `ReplicationMessage` for a DELETE. The single tuple carried
    /// (key-only or full old row) becomes the event body; there is no
    /// concept of changed columns for a delete.
    pub fn dump_delete(
        relation_id: u32,
        old_row: &[Cell],
        relations: &RelationSet,
    ) -> Result<ReplicationMessage> {
        let (schema, table) = relations.assist(relation_id)?;
        let body = relations.values(relation_id, old_row)?;

        Ok(ReplicationMessage {
            kind: EventKind::Delete,
            schema: schema.to_string(),
            table: table.to_string(),
            body,
            columns: Vec::new(),
        })
    }

    /// Keys present in both images whose typed value differs. Decoding the
    /// old image is best-effort: a failure drops the changed-columns list
    /// rather than failing the whole dump (spec §4.D step 3).
    ///
    /// A key in `old_values` that's absent from `new_values` only happens
    /// when the new row's cell was an unchanged-TOAST sentinel (that's the
    /// one case `RelationSet::values` omits a column for); spec §4.D's note
    /// treats those as implicitly not changed, so such a key is never added
    /// here, even though it's also "absent from the new image".
    fn changed_columns(
        relation_id: u32,
        prior_row: Option<&[Cell]>,
        new_values: &IndexMap<String, TypedValue>,
        relations: &RelationSet,
    ) -> Vec<String> {
        let Some(prior_cells) = prior_row else {
            return Vec::new();
        };

        let old_values = match relations.values(relation_id, prior_cells) {
            Ok(values) => values,
            Err(err) => {
                warn!("failed to decode prior row image, omitting changed columns: {err}");
                return Vec::new();
            }
        };

        old_values
            .iter()
            .filter_map(|(key, old_value)| match new_values.get(key) {
                Some(new_value) if !new_value.value_eq(old_value) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnInfo, RelationInfo};

    fn relations_with(replica_identity: u8) -> RelationSet {
        let mut set = RelationSet::new();
        set.add(RelationInfo {
            id: 1,
            namespace: "public".to_string(),
            name: "t".to_string(),
            replica_identity,
            columns: vec![
                ColumnInfo {
                    name: "a".to_string(),
                    type_oid: crate::codec::oid::INT4,
                    type_modifier: -1,
                    is_key: true,
                },
                ColumnInfo {
                    name: "b".to_string(),
                    type_oid: crate::codec::oid::TEXT,
                    type_modifier: -1,
                    is_key: false,
                },
            ],
        });
        set
    }

    #[test]
    fn insert_has_no_changed_columns() {
        let relations = relations_with(b'd');
        let new_row = vec![Cell::Text(b"1".to_vec()), Cell::Text(b"abc".to_vec())];
        let msg = EventDumper::dump_insert(1, &new_row, &relations).unwrap();
        assert_eq!(msg.kind, EventKind::Insert);
        assert_eq!(msg.schema, "public");
        assert_eq!(msg.table, "t");
        assert!(msg.columns.is_empty());
        assert_eq!(msg.body.get("a"), Some(&TypedValue::I32(1)));
    }

    #[test]
    fn update_with_full_identity_reports_changed_column() {
        let relations = relations_with(b'f');
        let old_row = vec![Cell::Text(b"1".to_vec()), Cell::Text(b"x".to_vec())];
        let new_row = vec![Cell::Text(b"1".to_vec()), Cell::Text(b"y".to_vec())];
        let msg = EventDumper::dump_update(1, Some(&old_row), &new_row, &relations).unwrap();
        assert_eq!(msg.columns, vec!["b".to_string()]);
    }

    #[test]
    fn update_without_prior_image_has_no_changed_columns() {
        let relations = relations_with(b'd');
        let new_row = vec![Cell::Text(b"1".to_vec()), Cell::Text(b"y".to_vec())];
        let msg = EventDumper::dump_update(1, None, &new_row, &relations).unwrap();
        assert!(msg.columns.is_empty());
    }

    #[test]
    fn unchanged_toast_column_is_not_reported_as_changed() {
        let relations = relations_with(b'f');
        let old_row = vec![Cell::Text(b"1".to_vec()), Cell::Text(b"x".to_vec())];
        // new row's `b` cell is unchanged TOAST: omitted from body, and per
        // spec §4.D's note must not end up in `columns` either, even though
        // it's also absent from the new image.
        let new_row = vec![Cell::Text(b"1".to_vec()), Cell::UnchangedToast];
        let msg = EventDumper::dump_update(1, Some(&old_row), &new_row, &relations).unwrap();
        assert!(!msg.body.contains_key("b"));
        assert!(msg.columns.is_empty());
    }

    #[test]
    fn delete_body_comes_from_key_tuple() {
        let relations = relations_with(b'd');
        let key_row = vec![Cell::Text(b"1".to_vec()), Cell::Null];
        let msg = EventDumper::dump_delete(1, &key_row, &relations).unwrap();
        assert_eq!(msg.kind, EventKind::Delete);
        assert_eq!(msg.body.get("a"), Some(&TypedValue::I32(1)));
        assert_eq!(msg.body.get("b"), Some(&TypedValue::Null));
    }
}
