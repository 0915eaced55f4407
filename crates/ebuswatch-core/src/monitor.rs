// ── Monitor loop ──
//
// Holds a listening connection to the daemon and feeds every streamed
// line into the State Store. Disconnected → Connecting → Listening, back
// to Disconnected on any transport error, forever.

use std::convert::Infallible;
use std::sync::Arc;

use ebuswatch_api::{Backoff, DaemonConnection, Error, ReconnectConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::decoder::Decoder;
use crate::store::StateStore;
use crate::supervise::{apply_line, handle_abort};

const TASK: &str = "monitor";

/// Run the Monitor loop until `cancel` fires.
///
/// The connection is closed on every exit from the listening state before
/// the next attempt.
pub async fn run_monitor<C>(
    mut conn: C,
    store: Arc<StateStore>,
    decoder: Arc<dyn Decoder>,
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
            result = listen(&mut conn, &store, decoder.as_ref(), &mut backoff) => result,
        };
        conn.disconnect().await;

        let Err(err) = result;
        if !handle_abort(TASK, &err, &mut backoff, &store, &cancel).await {
            break;
        }
    }

    conn.disconnect().await;
    debug!("monitor loop exiting");
}

/// One connection lifetime. Only returns on a transport failure.
async fn listen<C>(
    conn: &mut C,
    store: &StateStore,
    decoder: &dyn Decoder,
    backoff: &mut Backoff,
) -> Result<Infallible, Error>
where
    C: DaemonConnection,
{
    conn.connect().await?;
    conn.start_listening().await?;
    info!("monitor started");
    backoff.reset();

    loop {
        let line = conn.read_line().await?;
        debug!(line = %line, "monitor line");
        // Decode failures are per line and already logged.
        let _ = apply_line(TASK, &line, decoder, store).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::model::{Availability, Value};
    use crate::testing::{MockConnection, Reply, fixture};

    fn spawn(conn: &MockConnection, fx: &crate::testing::Fixture) -> CancellationToken {
        let cancel = CancellationToken::new();
        tokio::spawn(run_monitor(
            conn.clone(),
            Arc::clone(&fx.store),
            fx.decoder.clone(),
            ReconnectConfig::default(),
            cancel.clone(),
        ));
        cancel
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_follow_backoff_sequence() {
        let fx = fixture();
        let conn = MockConnection::with(|s| s.fail_connects = usize::MAX);
        let cancel = spawn(&conn, &fx);

        tokio::time::sleep(Duration::from_secs(400)).await;
        cancel.cancel();

        let gaps = conn.connect_gaps();
        assert_eq!(gaps[..9], [1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_outage_resets_state_exactly_once() {
        let fx = fixture();
        let resets = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resets);
        fx.store
            .add_observer(fx.pressure.clone(), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .detach();

        let conn = MockConnection::with(|s| s.fail_connects = usize::MAX);
        let cancel = spawn(&conn, &fx);

        // Seven failures reach the ceiling, five more stay there.
        tokio::time::sleep(Duration::from_secs(63 + 5 * 60 + 1)).await;
        cancel.cancel();

        assert!(conn.state().connect_attempts.len() >= 12);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_line_keeps_connection_and_other_keys() {
        let fx = fixture();
        let conn = MockConnection::with(|s| {
            s.stream.push_back(Reply::line("bai FlowTemp = 40.0;ok"));
            s.stream.push_back(Reply::line("this is not a line"));
            s.stream.push_back(Reply::line("bai Unknown = 1"));
            s.stream.push_back(Reply::line("bai WaterPressure = 1.84"));
        });
        let cancel = spawn(&conn, &fx);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(conn.state().connect_attempts.len(), 1);
        assert_eq!(conn.state().disconnects, 0);
        let flow = fx.store.get(&fx.flow).unwrap();
        assert_eq!(flow.value, Some(Value::Float(40.0)));
        let pressure = fx.store.get(&fx.pressure).unwrap();
        assert_eq!(pressure.value, Some(Value::Float(1.84)));
        assert_eq!(fx.store.get(&fx.hours).unwrap().availability, Availability::Unknown);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_closes_then_reconnects() {
        let fx = fixture();
        let conn = MockConnection::with(|s| {
            s.stream.push_back(Reply::line("bai FlowTemp = 40.0"));
            s.stream.push_back(Reply::Closed);
        });
        let cancel = spawn(&conn, &fx);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        {
            let state = conn.state();
            assert_eq!(state.connect_attempts.len(), 2);
            assert_eq!(state.disconnects, 1);
            assert!(state.connected);
        }
        // A single drop is not a sustained outage.
        assert!(fx.store.get(&fx.flow).unwrap().availability.is_available());

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!conn.state().connected);
    }
}
