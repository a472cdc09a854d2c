//! Replication session state machine (spec §4.E).
//!
//! Negotiates slot/publication setup, streams `pgoutput` frames, assembles
//! per-transaction row events via Modules B/C/D, and acknowledges the server
//! at commit boundaries and on reply-requested heartbeats.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::{ReplicationError, Result};
use crate::event::{EventDumper, ReplicationMessage};
use crate::options::SessionOptions;
use crate::parser::MessageParser;
use crate::relation::RelationSet;
use crate::types::{DecodedMessage, EventKind};

/// Liveness floor on the wait for the next server message (spec §5).
pub const RECEIVE_DEADLINE: Duration = Duration::from_secs(10);

const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800; // seconds from 1970-01-01 to 2000-01-01

/// Tabular SQL result: each row is a list of nullable text values, matching
/// how libpq/tokio-postgres surface values before any typed decoding.
#[derive(Debug, Default, Clone)]
pub struct SqlRows {
    pub rows: Vec<Vec<Option<String>>>,
}

impl SqlRows {
    pub fn first_value(&self, col: usize) -> Option<&str> {
        self.rows.first()?.get(col)?.as_deref()
    }
}

/// One message read off the replication stream.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A WAL data frame: `wal_start` is the frame's starting LSN, `data` is
    /// the embedded `pgoutput` message to hand to the parser.
    Wal { wal_start: i64, data: Vec<u8> },
    /// A server keepalive, carrying the flag asking for an immediate reply.
    Heartbeat { reply_requested: bool },
    /// The bounded wait (`RECEIVE_DEADLINE`) elapsed with nothing to read.
    Deadline,
}

/// The transport capability this core consumes (spec §6). The real
/// implementation wraps a replication-mode connection; tests use an
/// in-memory fake (see `tests` below).
#[async_trait]
pub trait ReplicationConn: Send {
    async fn exec(&mut self, sql: &str) -> Result<SqlRows>;
    async fn start_replication(&mut self, slot: &str, publication: &str) -> Result<()>;
    async fn wait(&mut self, timeout: Duration) -> Result<ServerEvent>;
    async fn send_standby_status(
        &mut self,
        written_lsn: i64,
        flushed_lsn: i64,
        applied_lsn: i64,
        client_time_micros: i64,
        reply_requested: u8,
    ) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Disposition returned by the user-supplied `DMLHandler` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    Error,
    Ignore,
}

#[async_trait]
pub trait DmlHandler: Send {
    async fn handle(&mut self, event: ReplicationMessage) -> HandlerOutcome;
}

/// Owns the replication connection and catalogue for the session's lifetime.
pub struct Session<C: ReplicationConn> {
    conn: C,
    options: SessionOptions,
    relations: RelationSet,
    last_flushed_lsn: i64,
}

impl<C: ReplicationConn> Session<C> {
    pub fn new(conn: C, options: SessionOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            conn,
            options,
            relations: RelationSet::new(),
            last_flushed_lsn: 0,
        })
    }

    /// Runs setup then the main receive loop until the handler's `READY`
    /// call, commit/heartbeat processing, or cancellation ends it.
    pub async fn start<H: DmlHandler>(
        &mut self,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.setup(handler).await?;
        self.run_loop(handler, cancel).await
    }

    async fn setup<H: DmlHandler>(&mut self, handler: &mut H) -> Result<()> {
        if self.options.monitor_update_columns {
            for table in &self.options.tables {
                let sql = format!("ALTER TABLE {table} REPLICA IDENTITY FULL;");
                self.exec_tolerating_duplicate(&sql).await?;
            }
        }

        let publication_sql = if self.options.publish_all_tables() {
            format!(
                "CREATE PUBLICATION \"{}\" FOR ALL TABLES;",
                self.options.slot_name
            )
        } else {
            format!(
                "CREATE PUBLICATION \"{}\" FOR TABLE {};",
                self.options.slot_name,
                self.options.tables.join(", ")
            )
        };
        self.exec_tolerating_duplicate(&publication_sql).await?;

        let create_slot_sql = format!(
            "CREATE_REPLICATION_SLOT \"{}\" LOGICAL pgoutput;",
            self.options.slot_name
        );
        match self.conn.exec(&create_slot_sql).await {
            Ok(rows) => {
                if let Some(lsn_text) = rows.first_value(1) {
                    self.last_flushed_lsn = parse_lsn(lsn_text)?;
                }
                info!(
                    "created replication slot {} at lsn {}",
                    self.options.slot_name, self.last_flushed_lsn
                );
            }
            Err(err) if err.is_duplicate_object() => {
                debug!("replication slot already exists, resuming from server-confirmed position");
                self.last_flushed_lsn = 0;
            }
            Err(err) => return Err(err),
        }

        self.conn
            .start_replication(&self.options.slot_name, &self.options.slot_name)
            .await?;

        info!("streaming started for slot {}", self.options.slot_name);

        let ready = ReplicationMessage {
            kind: EventKind::Ready,
            schema: String::new(),
            table: String::new(),
            body: Default::default(),
            columns: Vec::new(),
        };
        handler.handle(ready).await;

        Ok(())
    }

    async fn exec_tolerating_duplicate(&mut self, sql: &str) -> Result<()> {
        match self.conn.exec(sql).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_duplicate_object() => {
                debug!("ignoring duplicate-object error for: {sql}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn run_loop<H: DmlHandler>(
        &mut self,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut pending_event: Option<ReplicationMessage> = None;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cancellation requested, stopping replication loop");
                    return self.conn.close().await;
                }
                event = self.conn.wait(RECEIVE_DEADLINE) => event?,
            };

            match event {
                ServerEvent::Deadline => continue,
                ServerEvent::Heartbeat { reply_requested } => {
                    if reply_requested {
                        self.send_standby_status(self.last_flushed_lsn).await?;
                    }
                }
                ServerEvent::Wal { data, .. } => {
                    self.process_wal_frame(&data, &mut pending_event, handler)
                        .await?;
                }
            }
        }
    }

    /// Parses and dispatches one `pgoutput` frame. The frame's `wal_start` is
    /// not needed: acknowledgement uses the `Commit` message's own
    /// `commit_lsn` rather than the WAL frame header (DESIGN.md).
    async fn process_wal_frame<H: DmlHandler>(
        &mut self,
        data: &[u8],
        pending_event: &mut Option<ReplicationMessage>,
        handler: &mut H,
    ) -> Result<()> {
        let message = MessageParser::parse_wal_message(data)?;

        match message {
            DecodedMessage::Relation { relation } => {
                debug!("relation update: {}.{}", relation.namespace, relation.name);
                self.relations.add(relation);
            }
            DecodedMessage::Insert { relation_id, new_row } => {
                let msg = EventDumper::dump_insert(relation_id, &new_row, &self.relations)?;
                *pending_event = Some(msg);
            }
            DecodedMessage::Update {
                relation_id,
                key_or_old_row,
                new_row,
            } => {
                let prior = key_or_old_row.as_ref().map(|(_, cells)| cells.as_slice());
                let msg = EventDumper::dump_update(relation_id, prior, &new_row, &self.relations)?;
                *pending_event = Some(msg);
            }
            DecodedMessage::Delete {
                relation_id,
                key_or_old_row: (_, cells),
            } => {
                let msg = EventDumper::dump_delete(relation_id, &cells, &self.relations)?;
                *pending_event = Some(msg);
            }
            DecodedMessage::Commit { commit_lsn, .. } => {
                if let Some(event) = pending_event.take() {
                    match handler.handle(event).await {
                        HandlerOutcome::Success | HandlerOutcome::Ignore => {
                            self.last_flushed_lsn = commit_lsn;
                            self.send_standby_status(commit_lsn).await?;
                        }
                        HandlerOutcome::Error => {
                            error!(
                                "handler rejected event at commit lsn {}; withholding acknowledgement",
                                commit_lsn
                            );
                        }
                    }
                }
            }
            DecodedMessage::Begin { .. }
            | DecodedMessage::Origin { .. }
            | DecodedMessage::Type { .. }
            | DecodedMessage::Truncate { .. } => {
                // accepted silently, per spec §4.E
            }
        }

        Ok(())
    }

    async fn send_standby_status(&mut self, lsn: i64) -> Result<()> {
        let ts = postgres_timestamp_now();
        self.conn
            .send_standby_status(lsn, lsn, lsn, ts, 0)
            .await
    }

    /// Drops the replication slot and publication created for this session.
    pub async fn drop_subscription(&mut self) -> Result<()> {
        let drop_slot_sql = format!(
            "SELECT pg_drop_replication_slot('{}');",
            self.options.slot_name
        );
        self.conn.exec(&drop_slot_sql).await?;

        let drop_publication_sql = format!(
            "DROP PUBLICATION IF EXISTS \"{}\";",
            self.options.slot_name
        );
        self.conn.exec(&drop_publication_sql).await?;

        Ok(())
    }

    pub fn last_flushed_lsn(&self) -> i64 {
        self.last_flushed_lsn
    }
}

fn postgres_timestamp_now() -> i64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    since_unix.as_micros() as i64 - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// Parses a PostgreSQL LSN's textual `HI/LO` hex form into a 64-bit value.
fn parse_lsn(text: &str) -> Result<i64> {
    let (hi, lo) = text
        .split_once('/')
        .ok_or_else(|| ReplicationError::protocol(format!("invalid lsn: {text}")))?;
    let hi = u32::from_str_radix(hi, 16)
        .map_err(|_| ReplicationError::protocol(format!("invalid lsn high word: {hi}")))?;
    let lo = u32::from_str_radix(lo, 16)
        .map_err(|_| ReplicationError::protocol(format!("invalid lsn low word: {lo}")))?;
    Ok(((hi as i64) << 32) | lo as i64)
}
