// ── Device gateway dispatch ──
//
// Routes messages from a `DeviceSocket` to callbacks registered per
// `(dev, circuit)` or for every device, and builds the commands that drive
// outputs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use ebuswatch_api::{DeviceCommand, DeviceMessage};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::observer::{ObserverResult, Registry, Subscription};

/// Device classes that report continuously and are not worth logging when
/// nobody listens.
const QUIET_DEVICES: [&str; 2] = ["ai", "wd"];

/// Routing key of a device message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub dev: String,
    pub circuit: String,
}

impl DeviceKey {
    pub fn new(dev: impl Into<String>, circuit: impl Into<String>) -> Self {
        Self {
            dev: dev.into(),
            circuit: circuit.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dev, self.circuit)
    }
}

/// Registry key of the callbacks that see every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AnyDevice;

impl fmt::Display for AnyDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("*")
    }
}

/// Registry of per-device and catch-all callbacks.
#[derive(Default)]
pub struct DeviceDispatcher {
    registry: Registry<DeviceKey, Arc<DeviceMessage>>,
    any: Registry<AnyDevice, Arc<DeviceMessage>>,
}

impl DeviceDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` with every message for `(dev, circuit)`.
    pub fn register<F, Fut>(&self, dev: &str, circuit: &str, callback: F) -> Subscription
    where
        F: Fn(Arc<DeviceMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ObserverResult> + Send + 'static,
    {
        self.registry.register(DeviceKey::new(dev, circuit), callback)
    }

    /// Call `callback` with every message, after the per-device callbacks.
    pub fn register_any<F, Fut>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<DeviceMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ObserverResult> + Send + 'static,
    {
        self.any.register(AnyDevice, callback)
    }

    /// Route one message. Returns `true` if at least one callback ran.
    pub async fn dispatch(&self, message: Arc<DeviceMessage>) -> bool {
        let key = DeviceKey::new(message.dev.as_str(), message.circuit.as_str());
        let keyed = self.registry.count(&key);
        let any = self.any.count(&AnyDevice);
        if keyed == 0 && any == 0 {
            if !QUIET_DEVICES.contains(&key.dev.as_str()) {
                info!(device = %key, value = ?message.value, "ignoring unregistered device");
            }
            return false;
        }
        debug!(device = %key, value = ?message.value, "handling");
        if keyed > 0 {
            self.registry.notify(&key, Arc::clone(&message)).await;
        }
        if any > 0 {
            self.any.notify(&AnyDevice, message).await;
        }
        true
    }

    /// Pump messages from `rx` into [`dispatch`](Self::dispatch) until
    /// cancelled or the socket is gone.
    pub async fn run(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<Arc<DeviceMessage>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Ok(message) => {
                        self.dispatch(message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "device dispatcher lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("device dispatcher exiting");
    }
}

/// Normalize a circuit name to the gateway's underscore notation:
/// `"1.01"` → `"1_01"`, `"relay 2"` → `"RELAY_2"`.
pub fn norm_circuit(name: &str) -> String {
    name.to_uppercase().replace([' ', '.'], "_")
}

/// Command switching a digital output. The wire value is `1` iff
/// `on != negate`.
pub fn set_output(dev: &str, circuit: &str, on: bool, negate: bool) -> DeviceCommand {
    DeviceCommand::set(dev, circuit, u8::from(on != negate))
}
