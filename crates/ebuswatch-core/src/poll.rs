// ── Poll loop ──
//
// Explicitly reads fields the push stream does not keep fresh, then sleeps
// until the next tracked field plausibly goes stale.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use ebuswatch_api::{Backoff, DaemonConnection, Error, ReconnectConfig};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decoder::Decoder;
use crate::model::{Availability, CircuitKey, StateEntry};
use crate::store::{Snapshot, StateStore};
use crate::supervise::{apply_line, handle_abort};

const TASK: &str = "poll";

/// Poll loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Grace period after connect and pause between consecutive reads.
    pub interval: Duration,
    /// Freshness timeout: values younger than this are not re-read.
    pub timeout: Duration,
    /// Deadline for a single read request.
    pub read_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(300),
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Run the Poll loop until `cancel` fires.
pub async fn run_poll<C>(
    mut conn: C,
    store: Arc<StateStore>,
    decoder: Arc<dyn Decoder>,
    settings: PollSettings,
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
            result = poll(&mut conn, &store, decoder.as_ref(), settings, &mut backoff) => result,
        };
        conn.disconnect().await;

        let Err(err) = result;
        if !handle_abort(TASK, &err, &mut backoff, &store, &cancel).await {
            break;
        }
    }

    conn.disconnect().await;
    debug!("poll loop exiting");
}

/// One connection lifetime. Only returns on a transport failure.
async fn poll<C>(
    conn: &mut C,
    store: &StateStore,
    decoder: &dyn Decoder,
    settings: PollSettings,
    backoff: &mut Backoff,
) -> Result<Infallible, Error>
where
    C: DaemonConnection,
{
    conn.connect().await?;
    info!("poll started");
    backoff.reset();
    tokio::time::sleep(settings.interval).await;

    loop {
        sweep(conn, store, decoder, settings).await?;
        let idle = idle_wait(&store.snapshot(), settings.timeout, Instant::now());
        info!(idle_s = idle.as_secs(), "poll idle");
        tokio::time::sleep(idle).await;
    }
}

/// Read every key that needs it, in store order.
///
/// Only transport errors abort the sweep; a rejected read marks the one
/// key unavailable.
pub(crate) async fn sweep<C>(
    conn: &mut C,
    store: &StateStore,
    decoder: &dyn Decoder,
    settings: PollSettings,
) -> Result<(), Error>
where
    C: DaemonConnection,
{
    for key in store.keys() {
        let Some(entry) = store.get(key) else {
            continue;
        };
        if !needs_poll(key, &entry, Instant::now(), settings.timeout) {
            continue;
        }

        match conn
            .read(key.field_name(), &key.circuit, settings.read_timeout, true)
            .await
        {
            Ok(line) => {
                debug!(line = %line, "poll reply");
                if apply_line(TASK, &line, decoder, store).await.is_err() {
                    store.mark_unavailable(key);
                }
            }
            // The bus is down, not the field.
            Err(e) if e.is_no_signal() => debug!(key = %key, "no signal"),
            Err(e) if e.is_command() => {
                store.mark_unavailable(key);
                warn!(
                    circuit = %key.circuit,
                    field = %key.field.name,
                    title = %key.field.title,
                    error = %e,
                    "field not available on this installation"
                );
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(settings.interval).await;
    }
    Ok(())
}

/// Whether `key` should be read in this sweep.
pub fn needs_poll(key: &CircuitKey, entry: &StateEntry, now: Instant, timeout: Duration) -> bool {
    if entry.is_fresh(now, timeout) {
        return false;
    }
    match entry.availability {
        Availability::Unavailable => false,
        Availability::Available => !key.field.is_status,
        Availability::Unknown => true,
    }
}

/// Time until the next pollable, available key goes stale.
///
/// Minimum over those keys of `timeout - age` (floored at zero), or the
/// full `timeout` when there is no such key.
pub fn idle_wait(snapshot: &Snapshot, timeout: Duration, now: Instant) -> Duration {
    snapshot
        .iter()
        .filter(|row| !row.key.field.is_status && row.state.availability.is_available())
        .filter_map(|row| row.state.last_seen)
        .map(|seen| timeout.saturating_sub(now.saturating_duration_since(seen)))
        .min()
        .unwrap_or(timeout)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::model::{Attrs, Value, ValueUpdate};
    use crate::testing::{MockConnection, Reply, fixture};

    fn settings() -> PollSettings {
        PollSettings::default()
    }

    fn update(key: &CircuitKey, value: Value) -> ValueUpdate {
        ValueUpdate {
            circuit: key.circuit.clone(),
            field: Arc::clone(&key.field),
            value,
            attrs: Attrs::new(),
        }
    }

    fn read_fields(conn: &MockConnection) -> Vec<String> {
        conn.state().reads.iter().map(|(_, f, _)| f.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_skips_fresh_keys() {
        let fx = fixture();
        fx.store.apply(update(&fx.pressure, Value::Float(1.5))).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let mut conn = MockConnection::with(|s| {
            s.replies.insert(("bai".into(), "FlowTemp".into()), Reply::line("bai FlowTemp = 40"));
            s.replies.insert(("bai".into(), "Hours".into()), Reply::line("bai Hours = 12"));
        });
        sweep(&mut conn, &fx.store, fx.decoder.as_ref(), settings()).await.unwrap();

        assert_eq!(read_fields(&conn), vec!["FlowTemp", "Hours"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_skips_available_status_fields_and_unavailable_keys() {
        let fx = fixture();
        fx.store.apply(update(&fx.flow, Value::Float(40.0))).await;
        fx.store.mark_unavailable(&fx.hours);
        // Both well past the freshness window.
        tokio::time::advance(Duration::from_secs(600)).await;

        let mut conn = MockConnection::with(|s| {
            s.replies.insert(
                ("bai".into(), "WaterPressure".into()),
                Reply::line("bai WaterPressure = 1.2"),
            );
        });
        sweep(&mut conn, &fx.store, fx.decoder.as_ref(), settings()).await.unwrap();

        assert_eq!(read_fields(&conn), vec!["WaterPressure"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_sleeps_interval_after_each_read() {
        let fx = fixture();
        let mut conn = MockConnection::with(|s| {
            for field in ["FlowTemp", "WaterPressure", "Hours"] {
                s.replies.insert(("bai".into(), field.into()), Reply::Command("element not found".into()));
            }
        });
        let start = Instant::now();
        sweep(&mut conn, &fx.store, fx.decoder.as_ref(), settings()).await.unwrap();

        let offsets: Vec<u64> = conn
            .state()
            .reads
            .iter()
            .map(|(_, _, at)| (*at - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 20, 40]);
        assert_eq!(Instant::now() - start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn command_error_marks_unavailable_but_no_signal_does_not() {
        let fx = fixture();
        let mut conn = MockConnection::with(|s| {
            s.replies.insert(("bai".into(), "FlowTemp".into()), Reply::Command("no signal".into()));
            s.replies.insert(
                ("bai".into(), "WaterPressure".into()),
                Reply::Command("element not found".into()),
            );
            s.replies.insert(("bai".into(), "Hours".into()), Reply::line("bai Hours = lots"));
        });
        sweep(&mut conn, &fx.store, fx.decoder.as_ref(), settings()).await.unwrap();

        assert_eq!(fx.store.get(&fx.flow).unwrap().availability, Availability::Unknown);
        assert_eq!(
            fx.store.get(&fx.pressure).unwrap().availability,
            Availability::Unavailable
        );
        // Undecodable reply.
        assert_eq!(fx.store.get(&fx.hours).unwrap().availability, Availability::Unavailable);
        assert_eq!(conn.state().reads.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_aborts_on_transport_error() {
        let fx = fixture();
        let mut conn = MockConnection::default();
        let err = sweep(&mut conn, &fx.store, fx.decoder.as_ref(), settings())
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(conn.state().reads.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_wait_is_minimum_remaining() {
        let fx = fixture();
        let timeout = Duration::from_secs(300);

        assert_eq!(idle_wait(&fx.store.snapshot(), timeout, Instant::now()), timeout);

        fx.store.apply(update(&fx.pressure, Value::Float(1.5))).await;
        tokio::time::advance(Duration::from_secs(70)).await;
        fx.store.apply(update(&fx.hours, Value::Int(5))).await;
        // Status fields never count.
        fx.store.apply(update(&fx.flow, Value::Float(40.0))).await;
        tokio::time::advance(Duration::from_secs(180)).await;

        // pressure: 250s old → 50s left; hours: 180s old → 120s left.
        let idle = idle_wait(&fx.store.snapshot(), timeout, Instant::now());
        assert_eq!(idle, Duration::from_secs(50));

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(idle_wait(&fx.store.snapshot(), timeout, Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_waits_grace_period_then_polls() {
        let fx = fixture();
        let conn = MockConnection::with(|s| {
            s.replies.insert(("bai".into(), "FlowTemp".into()), Reply::line("bai FlowTemp = 40"));
            s.replies.insert(
                ("bai".into(), "WaterPressure".into()),
                Reply::line("bai WaterPressure = 1.5"),
            );
            s.replies.insert(("bai".into(), "Hours".into()), Reply::line("bai Hours = 7"));
        });
        let cancel = CancellationToken::new();
        let start = Instant::now();
        tokio::spawn(run_poll(
            conn.clone(),
            Arc::clone(&fx.store),
            fx.decoder.clone(),
            settings(),
            ReconnectConfig::default(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(conn.state().reads.is_empty());

        // Grace (20) + three reads spaced by 20 → done at 80, idle until 300s after reads.
        tokio::time::sleep(Duration::from_secs(100)).await;
        let first_reads: Vec<u64> = conn
            .state()
            .reads
            .iter()
            .map(|(_, _, at)| (*at - start).as_secs())
            .collect();
        assert_eq!(first_reads, vec![20, 40, 60]);
        assert!(fx.store.get(&fx.hours).unwrap().availability.is_available());

        cancel.cancel();
    }
}
