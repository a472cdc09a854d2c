//! Thin binary wiring `pg_replica_core` to a real connection.
//!
//! Reads connection and subscription parameters from the environment and
//! streams decoded row events to a logging handler until interrupted.

use std::env;

use async_trait::async_trait;
use pg_replica_core::logging::LoggingConfig;
use pg_replica_core::transport::TokioPostgresConn;
use pg_replica_core::{DmlHandler, HandlerOutcome, ReplicationMessage, Session, SessionOptions};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct LoggingHandler;

#[async_trait]
impl DmlHandler for LoggingHandler {
    async fn handle(&mut self, event: ReplicationMessage) -> HandlerOutcome {
        info!(
            "{:?} {}.{}: {:?} (changed: {:?})",
            event.kind, event.schema, event.table, event.body, event.columns
        );
        HandlerOutcome::Success
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_config = LoggingConfig::from_env()?;
    logging_config.init_logging()?;

    let conn_config = env::var("PG_REPLICA_CONN")
        .map_err(|_| "PG_REPLICA_CONN environment variable not set")?;
    let slot_name = env::var("PG_REPLICA_SLOT").unwrap_or_else(|_| "pg_replica".to_string());
    let tables: Vec<String> = env::var("PG_REPLICA_TABLES")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();
    let monitor_update_columns = env::var("PG_REPLICA_MONITOR_UPDATE_COLUMNS")
        .map(|v| v.parse().unwrap_or(false))
        .unwrap_or(false);

    info!("connecting for slot {slot_name}");
    let options = SessionOptions::new(conn_config.clone(), slot_name)
        .with_tables(tables)
        .with_monitor_update_columns(monitor_update_columns);

    let conn = TokioPostgresConn::connect(&conn_config).await?;
    let mut session = Session::new(conn, options)?;
    let mut handler = LoggingHandler;

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install ctrl-c handler: {err}");
            return;
        }
        warn!("received interrupt signal, shutting down gracefully...");
        cancel_for_signal.cancel();
    });

    info!("streaming replication events (press ctrl-c to stop)...");
    session.start(&mut handler, cancel).await?;

    info!("replication session ended");
    Ok(())
}
