// ── Status loop ──
//
// Periodically asks the daemon for its `info` report and publishes it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ebuswatch_api::{Backoff, DaemonConnection, Error, ReconnectConfig};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::StateStore;
use crate::supervise::{handle_abort, sleep_or_cancel};

const TASK: &str = "status";

/// Parsed daemon `info` report: `key: value` lines.
pub type DaemonStatus = BTreeMap<String, String>;

/// Parse `key: value` lines. Lines without a colon are kept with an
/// empty value.
pub fn parse_info(lines: &[String]) -> DaemonStatus {
    lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once(':') {
            Some((key, value)) => (key.trim().to_owned(), value.trim().to_owned()),
            None => (line.trim().to_owned(), String::new()),
        })
        .collect()
}

/// Run the Status loop until `cancel` fires.
///
/// Each cycle connects, reads `info`, publishes it on `status`, sleeps
/// `interval` and disconnects.
pub async fn run_status<C>(
    mut conn: C,
    status: watch::Sender<Arc<DaemonStatus>>,
    store: Arc<StateStore>,
    interval: Duration,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) where
    C: DaemonConnection,
{
    let mut backoff = Backoff::new(reconnect);

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = refresh(&mut conn, &status) => result,
        };

        let keep_going = match result {
            Ok(()) => {
                backoff.reset();
                let keep_going = sleep_or_cancel(interval, &cancel).await;
                conn.disconnect().await;
                keep_going
            }
            Err(err) => {
                conn.disconnect().await;
                handle_abort(TASK, &err, &mut backoff, &store, &cancel).await
            }
        };
        if !keep_going {
            break;
        }
    }

    conn.disconnect().await;
    debug!("status loop exiting");
}

async fn refresh<C>(conn: &mut C, status: &watch::Sender<Arc<DaemonStatus>>) -> Result<(), Error>
where
    C: DaemonConnection,
{
    conn.connect().await?;
    let report = parse_info(&conn.info().await?);
    debug!(entries = report.len(), "status refreshed");
    status.send_replace(Arc::new(report));
    Ok(())
}
