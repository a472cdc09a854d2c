//! Option validator (spec §4.F).

use crate::errors::{ReplicationError, Result};

/// User-supplied configuration for a replication session, validated before
/// setup begins (generalized from the teacher's `ReplicationConfig::new`).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Connection parameters for opening the replication connection.
    pub conn_config: String,
    /// Slot / publication name.
    pub slot_name: String,
    /// Fully-qualified tables to publish. Empty ⇒ `FOR ALL TABLES`.
    pub tables: Vec<String>,
    /// Force REPLICA IDENTITY FULL on each table so UPDATEs carry old images.
    pub monitor_update_columns: bool,
}

impl SessionOptions {
    pub fn new(conn_config: impl Into<String>, slot_name: impl Into<String>) -> Self {
        Self {
            conn_config: conn_config.into(),
            slot_name: slot_name.into(),
            tables: Vec::new(),
            monitor_update_columns: false,
        }
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_monitor_update_columns(mut self, monitor: bool) -> Self {
        self.monitor_update_columns = monitor;
        self
    }

    /// Validates the option set, failing with `InvalidOption` naming the
    /// offending field (spec §4.F).
    pub fn validate(&self) -> Result<()> {
        if self.conn_config.trim().is_empty() {
            return Err(ReplicationError::invalid_option(
                "conn_config",
                "must not be empty",
            ));
        }

        if self.slot_name.trim().is_empty() {
            return Err(ReplicationError::invalid_option(
                "slot_name",
                "must not be empty",
            ));
        }

        if !is_valid_identifier(&self.slot_name) {
            return Err(ReplicationError::invalid_option(
                "slot_name",
                "must contain only alphanumeric characters and underscores",
            ));
        }

        if self.slot_name.len() > 63 {
            return Err(ReplicationError::invalid_option(
                "slot_name",
                "must not be longer than 63 characters",
            ));
        }

        for table in &self.tables {
            if table.trim().is_empty() {
                return Err(ReplicationError::invalid_option(
                    "tables",
                    "table names must not be empty",
                ));
            }
        }

        Ok(())
    }

    /// `true` when the table list is empty: the session should publish
    /// `FOR ALL TABLES` rather than an explicit list (spec §4.F).
    pub fn publish_all_tables(&self) -> bool {
        self.tables.is_empty()
    }
}

fn is_valid_identifier(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_conn_config() {
        let opts = SessionOptions::new("", "slot");
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_empty_slot_name() {
        let opts = SessionOptions::new("host=localhost", "");
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_invalid_slot_name_characters() {
        let opts = SessionOptions::new("host=localhost", "bad-slot!");
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_overlong_slot_name() {
        let opts = SessionOptions::new("host=localhost", "a".repeat(64));
        assert!(opts.validate().is_err());
    }

    #[test]
    fn accepts_valid_options() {
        let opts = SessionOptions::new("host=localhost", "sub_1")
            .with_tables(vec!["public.orders".to_string()])
            .with_monitor_update_columns(true);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn empty_table_list_means_all_tables() {
        let opts = SessionOptions::new("host=localhost", "sub_1");
        assert!(opts.publish_all_tables());
    }
}
