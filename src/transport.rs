//! `tokio-postgres`-backed [`ReplicationConn`]. Out of scope per spec, but
//! the binary needs one concrete transport to actually stream bytes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_postgres::{CopyBothDuplex, NoTls, SimpleQueryMessage};
use tracing::error;

use crate::buffer::{BufferReader, BufferWriter};
use crate::errors::{ReplicationError, Result};
use crate::session::{ReplicationConn, ServerEvent, SqlRows};

pub struct TokioPostgresConn {
    client: tokio_postgres::Client,
    copy_stream: Option<CopyBothDuplex<Bytes>>,
}

impl TokioPostgresConn {
    /// Opens a replication-mode connection. `conninfo` is a libpq keyword/
    /// value connection string; `replication=database` is appended so the
    /// server accepts `CREATE_REPLICATION_SLOT`/`START_REPLICATION`.
    pub async fn connect(conninfo: &str) -> Result<Self> {
        let conninfo = format!("{conninfo} replication=database");
        let (client, connection) = tokio_postgres::connect(&conninfo, NoTls)
            .await
            .map_err(to_replication_error)?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("replication connection terminated: {err}");
            }
        });

        Ok(Self {
            client,
            copy_stream: None,
        })
    }
}

#[async_trait]
impl ReplicationConn for TokioPostgresConn {
    async fn exec(&mut self, sql: &str) -> Result<SqlRows> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(to_replication_error)?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let values = (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect();
                rows.push(values);
            }
        }
        Ok(SqlRows { rows })
    }

    async fn start_replication(&mut self, slot: &str, publication: &str) -> Result<()> {
        let sql = format!(
            "START_REPLICATION SLOT \"{slot}\" LOGICAL 0/0 (proto_version '1', publication_names '\"{publication}\"')"
        );
        let stream = self
            .client
            .copy_both_simple::<Bytes>(&sql)
            .await
            .map_err(to_replication_error)?;
        self.copy_stream = Some(stream);
        Ok(())
    }

    async fn wait(&mut self, timeout: Duration) -> Result<ServerEvent> {
        let stream = self
            .copy_stream
            .as_mut()
            .ok_or_else(|| ReplicationError::connection("replication not started"))?;

        match tokio::time::timeout(timeout, stream.next()).await {
            Err(_) => Ok(ServerEvent::Deadline),
            Ok(None) => Err(ReplicationError::connection("replication stream closed")),
            Ok(Some(Err(err))) => Err(to_replication_error(err)),
            Ok(Some(Ok(bytes))) => decode_copy_data(&bytes),
        }
    }

    async fn send_standby_status(
        &mut self,
        written_lsn: i64,
        flushed_lsn: i64,
        applied_lsn: i64,
        client_time_micros: i64,
        reply_requested: u8,
    ) -> Result<()> {
        let mut raw = [0u8; 34];
        {
            let mut writer = BufferWriter::new(&mut raw);
            writer.write_u8(b'r')?;
            writer.write_i64(written_lsn)?;
            writer.write_i64(flushed_lsn)?;
            writer.write_i64(applied_lsn)?;
            writer.write_i64(client_time_micros)?;
            writer.write_u8(reply_requested)?;
        }

        let stream = self
            .copy_stream
            .as_mut()
            .ok_or_else(|| ReplicationError::connection("replication not started"))?;
        stream
            .send(Bytes::copy_from_slice(&raw))
            .await
            .map_err(to_replication_error)
    }

    async fn close(&mut self) -> Result<()> {
        self.copy_stream = None;
        Ok(())
    }
}

/// Unwraps one `CopyData` frame: either an `XLogData` ('w') WAL frame or a
/// `PrimaryKeepAlive` ('k') heartbeat, per the streaming replication protocol.
fn decode_copy_data(bytes: &Bytes) -> Result<ServerEvent> {
    if bytes.is_empty() {
        return Err(ReplicationError::protocol("empty copy data frame"));
    }

    match bytes[0] {
        b'w' => {
            let mut reader = BufferReader::new(&bytes[1..]);
            let wal_start = reader.read_i64()?;
            let _wal_end = reader.read_i64()?;
            let _send_time = reader.read_i64()?;
            Ok(ServerEvent::Wal {
                wal_start,
                data: reader.remaining_slice().to_vec(),
            })
        }
        b'k' => {
            let mut reader = BufferReader::new(&bytes[1..]);
            let _wal_end = reader.read_i64()?;
            let _send_time = reader.read_i64()?;
            let reply_flag = reader.read_u8()?;
            Ok(ServerEvent::Heartbeat {
                reply_requested: reply_flag != 0,
            })
        }
        other => Err(ReplicationError::protocol(format!(
            "unrecognized copy-data tag: {:#04x}",
            other
        ))),
    }
}

fn to_replication_error(err: tokio_postgres::Error) -> ReplicationError {
    if let Some(db_error) = err.as_db_error() {
        ReplicationError::sql(db_error.code().code().to_string(), db_error.message().to_string())
    } else {
        ReplicationError::connection(err.to_string())
    }
}
