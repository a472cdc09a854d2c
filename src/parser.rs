//! PostgreSQL logical replication protocol message parser (spec §4.B).
//! Parses a single `pgoutput` frame into a `DecodedMessage`.
//!
//! See https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html

use crate::buffer::BufferReader;
use crate::codec::{self, Cell};
use crate::errors::{ReplicationError, Result};
use crate::types::{ColumnInfo, DecodedMessage, PriorImageKind, RelationInfo};
use tracing::debug;

pub struct MessageParser;

impl MessageParser {
    /// Parses one complete `pgoutput` frame.
    pub fn parse_wal_message(buffer: &[u8]) -> Result<DecodedMessage> {
        let mut reader = BufferReader::new(buffer);
        let message_type = reader.skip_message_type()?;

        debug!("parsing message type: {}", message_type);

        match message_type {
            'B' => Self::parse_begin(&mut reader),
            'C' => Self::parse_commit(&mut reader),
            'O' => Self::parse_origin(&mut reader),
            'R' => Self::parse_relation(&mut reader),
            'Y' => Self::parse_type(&mut reader),
            'I' => Self::parse_insert(&mut reader),
            'U' => Self::parse_update(&mut reader),
            'D' => Self::parse_delete(&mut reader),
            'T' => Self::parse_truncate(&mut reader),
            other => Err(ReplicationError::unknown_message(other.to_string())),
        }
    }

    fn parse_begin(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let final_lsn = reader.read_i64()?;
        let commit_time = reader.read_i64()?;
        let xid = reader.read_i32()?;

        Ok(DecodedMessage::Begin {
            final_lsn,
            commit_time,
            xid,
        })
    }

    fn parse_commit(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let flags = reader.read_u8()?;
        let commit_lsn = reader.read_i64()?;
        let end_lsn = reader.read_i64()?;
        let commit_time = reader.read_i64()?;

        Ok(DecodedMessage::Commit {
            flags,
            commit_lsn,
            end_lsn,
            commit_time,
        })
    }

    fn parse_origin(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let commit_lsn = reader.read_i64()?;
        let name = reader.read_null_terminated_string()?;

        Ok(DecodedMessage::Origin { commit_lsn, name })
    }

    fn parse_relation(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let id = reader.read_u32()?;
        let namespace = reader.read_null_terminated_string()?;
        let name = reader.read_null_terminated_string()?;
        let replica_identity = reader.read_u8()?;
        let column_count = reader.read_i16()?;
        if column_count < 0 {
            return Err(ReplicationError::parse("negative relation column count"));
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for i in 0..column_count {
            if !reader.has_bytes(1) {
                return Err(ReplicationError::parse_with_context(
                    "relation column truncated",
                    format!("column {} of {}", i + 1, column_count),
                ));
            }

            let key_flag = reader.read_u8()?;
            let column_name = reader.read_null_terminated_string()?;
            let type_oid = reader.read_u32()?;
            let type_modifier = reader.read_i32()?;

            columns.push(ColumnInfo {
                name: column_name,
                type_oid,
                type_modifier,
                is_key: key_flag != 0,
            });
        }

        Ok(DecodedMessage::Relation {
            relation: RelationInfo {
                id,
                namespace,
                name,
                replica_identity,
                columns,
            },
        })
    }

    fn parse_type(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let id = reader.read_u32()?;
        let namespace = reader.read_null_terminated_string()?;
        let name = reader.read_null_terminated_string()?;

        Ok(DecodedMessage::Type { id, namespace, name })
    }

    fn parse_insert(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let relation_id = reader.read_u32()?;
        Self::expect_marker(reader, b'N')?;
        let new_row = Self::parse_tuple(reader)?;

        Ok(DecodedMessage::Insert {
            relation_id,
            new_row,
        })
    }

    fn parse_update(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let relation_id = reader.read_u32()?;
        let marker = reader.read_u8()?;

        let key_or_old_row = match marker {
            b'K' => Some((PriorImageKind::Key, Self::parse_tuple(reader)?)),
            b'O' => Some((PriorImageKind::Old, Self::parse_tuple(reader)?)),
            b'N' => None,
            other => {
                return Err(ReplicationError::parse_with_context(
                    "invalid marker in update message",
                    format!("found: {}", other as char),
                ))
            }
        };

        if key_or_old_row.is_some() {
            Self::expect_marker(reader, b'N')?;
        }

        let new_row = Self::parse_tuple(reader)?;

        Ok(DecodedMessage::Update {
            relation_id,
            key_or_old_row,
            new_row,
        })
    }

    fn parse_delete(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let relation_id = reader.read_u32()?;
        let marker = reader.read_u8()?;

        let kind = match marker {
            b'K' => PriorImageKind::Key,
            b'O' => PriorImageKind::Old,
            other => {
                return Err(ReplicationError::parse_with_context(
                    "invalid marker in delete message",
                    format!("found: {}", other as char),
                ))
            }
        };

        let tuple = Self::parse_tuple(reader)?;

        Ok(DecodedMessage::Delete {
            relation_id,
            key_or_old_row: (kind, tuple),
        })
    }

    fn parse_truncate(reader: &mut BufferReader) -> Result<DecodedMessage> {
        let n = reader.read_i32()?;
        if n < 0 {
            return Err(ReplicationError::parse("negative truncate relation count"));
        }
        let options = reader.read_u8()?;

        let mut relation_ids = Vec::with_capacity(n as usize);
        for i in 0..n {
            if !reader.has_bytes(4) {
                return Err(ReplicationError::parse_with_context(
                    "truncate relation ids truncated",
                    format!("relation {} of {}", i + 1, n),
                ));
            }
            relation_ids.push(reader.read_u32()?);
        }

        Ok(DecodedMessage::Truncate {
            relation_ids,
            options,
        })
    }

    /// Tuples are decoded by Module A against the reader's remaining bytes;
    /// the reader's cursor is advanced by however much Module A consumed.
    fn parse_tuple(reader: &mut BufferReader) -> Result<Vec<Cell>> {
        let start = reader.position();
        let (cells, consumed) = codec::decode_tuple(reader.remaining_slice())?;
        reader.set_position(start + consumed)?;
        Ok(cells)
    }

    fn expect_marker(reader: &mut BufferReader, expected: u8) -> Result<()> {
        let marker = reader.read_u8()?;
        if marker != expected {
            return Err(ReplicationError::parse_with_context(
                format!("expected '{}' marker", expected as char),
                format!("found: {}", marker as char),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin_bytes(final_lsn: i64, commit_time: i64, xid: i32) -> Vec<u8> {
        let mut buf = vec![b'B'];
        buf.extend_from_slice(&final_lsn.to_be_bytes());
        buf.extend_from_slice(&commit_time.to_be_bytes());
        buf.extend_from_slice(&xid.to_be_bytes());
        buf
    }

    #[test]
    fn parses_begin_message() {
        let buf = begin_bytes(100, 12345, 7);
        let msg = MessageParser::parse_wal_message(&buf).unwrap();
        assert_eq!(
            msg,
            DecodedMessage::Begin {
                final_lsn: 100,
                commit_time: 12345,
                xid: 7,
            }
        );
    }

    #[test]
    fn parses_relation_message() {
        let mut buf = vec![b'R'];
        buf.extend_from_slice(&16384u32.to_be_bytes());
        buf.extend_from_slice(b"public\0");
        buf.extend_from_slice(b"t\0");
        buf.push(b'd');
        buf.extend_from_slice(&2i16.to_be_bytes());
        // column: id int4 pk
        buf.push(1);
        buf.extend_from_slice(b"id\0");
        buf.extend_from_slice(&23u32.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        // column: name text
        buf.push(0);
        buf.extend_from_slice(b"name\0");
        buf.extend_from_slice(&25u32.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());

        let msg = MessageParser::parse_wal_message(&buf).unwrap();
        match msg {
            DecodedMessage::Relation { relation } => {
                assert_eq!(relation.id, 16384);
                assert_eq!(relation.namespace, "public");
                assert_eq!(relation.name, "t");
                assert_eq!(relation.columns.len(), 2);
                assert!(relation.columns[0].is_key);
                assert!(!relation.columns[1].is_key);
            }
            other => panic!("expected Relation, got {:?}", other),
        }
    }

    #[test]
    fn parses_insert_message() {
        let mut buf = vec![b'I'];
        buf.extend_from_slice(&16384u32.to_be_bytes());
        buf.push(b'N');
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&3i32.to_be_bytes());
        buf.extend_from_slice(b"abc");

        let msg = MessageParser::parse_wal_message(&buf).unwrap();
        match msg {
            DecodedMessage::Insert { relation_id, new_row } => {
                assert_eq!(relation_id, 16384);
                assert_eq!(new_row, vec![Cell::Text(b"abc".to_vec())]);
            }
            other => panic!("expected Insert, got {:?}", other),
        }
    }

    #[test]
    fn parses_update_message_with_full_old_image() {
        let mut buf = vec![b'U'];
        buf.extend_from_slice(&16384u32.to_be_bytes());
        buf.push(b'O');
        // old tuple: 1 column, text "x"
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&1i32.to_be_bytes());
        buf.extend_from_slice(b"x");
        buf.push(b'N');
        // new tuple: 1 column, text "y"
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&1i32.to_be_bytes());
        buf.extend_from_slice(b"y");

        let msg = MessageParser::parse_wal_message(&buf).unwrap();
        match msg {
            DecodedMessage::Update {
                relation_id,
                key_or_old_row,
                new_row,
            } => {
                assert_eq!(relation_id, 16384);
                let (kind, old_row) = key_or_old_row.unwrap();
                assert_eq!(kind, PriorImageKind::Old);
                assert_eq!(old_row, vec![Cell::Text(b"x".to_vec())]);
                assert_eq!(new_row, vec![Cell::Text(b"y".to_vec())]);
            }
            other => panic!("expected Update, got {:?}", other),
        }
    }

    #[test]
    fn parses_delete_with_key_identity() {
        let mut buf = vec![b'D'];
        buf.extend_from_slice(&16384u32.to_be_bytes());
        buf.push(b'K');
        buf.extend_from_slice(&2i16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&1i32.to_be_bytes());
        buf.extend_from_slice(b"1");
        buf.push(b'n');

        let msg = MessageParser::parse_wal_message(&buf).unwrap();
        match msg {
            DecodedMessage::Delete { relation_id, key_or_old_row } => {
                assert_eq!(relation_id, 16384);
                assert_eq!(key_or_old_row.0, PriorImageKind::Key);
                assert_eq!(
                    key_or_old_row.1,
                    vec![Cell::Text(b"1".to_vec()), Cell::Null]
                );
            }
            other => panic!("expected Delete, got {:?}", other),
        }
    }

    #[test]
    fn unknown_message_type_is_an_error() {
        let buf = vec![b'?'];
        assert!(MessageParser::parse_wal_message(&buf).is_err());
    }

    #[test]
    fn truncated_message_is_an_error() {
        let buf = vec![b'B', 0, 0];
        assert!(MessageParser::parse_wal_message(&buf).is_err());
    }
}
