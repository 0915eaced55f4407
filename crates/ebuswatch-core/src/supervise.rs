// ── Loop supervision helpers ──
//
// Shared by the Monitor, Poll and Status loops: failure handling with
// backoff escalation, cancellable sleeps and line decoding into the store.

use std::time::Duration;

use ebuswatch_api::{Backoff, Error};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::decoder::Decoder;
use crate::error::DecodeError;
use crate::store::StateStore;

/// Sleep for `delay` unless cancelled first. Returns `false` if cancelled.
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Record a connection failure, escalate to a full state reset on the
/// first failure at the backoff ceiling, then sleep the backoff delay.
///
/// Returns `false` if cancelled while sleeping.
pub(crate) async fn handle_abort(
    name: &'static str,
    err: &Error,
    backoff: &mut Backoff,
    store: &StateStore,
    cancel: &CancellationToken,
) -> bool {
    let step = backoff.fail();
    let retry_s = step.delay.as_secs();
    if step.escalate {
        store.reset_all().await;
        error!(task = name, error = %err, retry_s, "connection lost for too long, states reset");
    } else if step.outages > 0 {
        error!(task = name, error = %err, retry_s, outages = step.outages, "still disconnected");
    } else {
        error!(task = name, error = %err, retry_s, "connection failed");
    }
    sleep_or_cancel(step.delay, cancel).await
}

/// Decode `line` and apply every resulting update.
///
/// Decode errors are logged here (format errors at error level, unknown
/// fields at warn level) and returned so the caller can react per key.
pub(crate) async fn apply_line(
    name: &'static str,
    line: &str,
    decoder: &dyn Decoder,
    store: &StateStore,
) -> Result<usize, DecodeError> {
    let updates = match decoder.decode(line) {
        Ok(updates) => updates,
        Err(e) => {
            match &e {
                DecodeError::Format { .. } => error!(task = name, error = %e, "decode failed"),
                DecodeError::Unknown { .. } => warn!(task = name, error = %e, "decode failed"),
            }
            return Err(e);
        }
    };

    let count = updates.len();
    for update in updates {
        let circuit = update.circuit.clone();
        let field = std::sync::Arc::clone(&update.field);
        let value = update.value.to_string();
        if store.apply(update).await {
            info!(task = name, circuit = %circuit, field = %field.title, value = %value, "updated");
        }
    }
    Ok(count)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::StaticCatalog;
    use crate::decoder::LineDecoder;
    use crate::model::{Availability, CircuitKey, FieldDescriptor, Value};
    use crate::units::UnitTable;

    fn setup() -> (StateStore, LineDecoder, CircuitKey, CircuitKey) {
        let flow = FieldDescriptor::new("FlowTemp", "Flow", "temp");
        let ret = FieldDescriptor::new("ReturnTemp", "Return", "temp");
        let catalog = StaticCatalog::new()
            .with_field("bai", flow.clone())
            .with_field("bai", ret.clone());
        let a = CircuitKey::new("bai", Arc::new(flow));
        let b = CircuitKey::new("bai", Arc::new(ret));
        let store = StateStore::new([a.clone(), b.clone()]);
        (
            store,
            LineDecoder::new(Arc::new(catalog), UnitTable::builtin()),
            a,
            b,
        )
    }

    #[tokio::test]
    async fn malformed_line_does_not_touch_other_keys() {
        let (store, decoder, a, b) = setup();
        apply_line("test", "bai FlowTemp = 40", &decoder, &store).await.unwrap();

        assert!(apply_line("test", "bai ReturnTemp = warm", &decoder, &store).await.is_err());
        assert!(apply_line("test", "complete garbage", &decoder, &store).await.is_err());

        assert_eq!(store.get(&a).unwrap().value, Some(Value::Float(40.0)));
        assert_eq!(store.get(&b).unwrap().availability, Availability::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_escalates_once_per_outage() {
        let (store, _decoder, a, _b) = setup();
        let cancel = CancellationToken::new();
        let mut backoff = Backoff::default();
        let err = Error::Closed;

        let resets = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&resets);
        store
            .add_observer(a, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
            })
            .detach();

        for _ in 0..12 {
            assert!(handle_abort("test", &err, &mut backoff, &store, &cancel).await);
        }
        assert_eq!(resets.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_sleep_returns_false() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(60), &cancel).await);
    }
}
