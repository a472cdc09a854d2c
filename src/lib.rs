//! `pg_replica_core` — a `pgoutput` logical replication consumer.
//!
//! Decodes PostgreSQL's binary logical-replication wire protocol into
//! row-level change events and drives the slot/publication setup and
//! acknowledgement discipline around it. The transport itself is abstracted
//! behind [`session::ReplicationConn`] so this crate has no opinion about how
//! bytes reach the wire.

pub mod buffer;
pub mod codec;
pub mod errors;
pub mod event;
pub mod logging;
pub mod options;
pub mod parser;
pub mod relation;
pub mod session;
pub mod transport;
pub mod types;

pub use errors::{ReplicationError, Result};
pub use event::ReplicationMessage;
pub use options::SessionOptions;
pub use session::{DmlHandler, HandlerOutcome, ReplicationConn, ServerEvent, Session, SqlRows};
