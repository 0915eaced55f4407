// ── Gateway facade ──
//
// Owns the State Store, spawns and supervises the Monitor / Poll / Status
// loops and the device-gateway pump, and exposes the Write Path.

use std::sync::Arc;

use ebuswatch_api::{DeviceCommand, DeviceSocket, LineConnection};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::FieldCatalog;
use crate::circuit_map::CircuitMap;
use crate::config::GatewayConfig;
use crate::decoder::Decoder;
use crate::devices::DeviceDispatcher;
use crate::model::CircuitKey;
use crate::monitor::run_monitor;
use crate::poll::run_poll;
use crate::status::{DaemonStatus, run_status};
use crate::store::StateStore;
use crate::writer::Writer;

/// Central handle to one daemon (and optional device gateway).
///
/// Cheap to clone; all clones share the same store and tasks.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    store: Arc<StateStore>,
    decoder: Arc<dyn Decoder>,
    writer: Arc<Writer>,
    status: watch::Sender<Arc<DaemonStatus>>,
    dispatcher: Arc<DeviceDispatcher>,
    device_socket: Mutex<Option<DeviceSocket>>,
    cancel: CancellationToken,
    /// Child token for the current run, replaced on every `start`.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Build the store from the configured circuits × catalog fields. Does
    /// NOT connect; call [`start`](Self::start).
    pub fn new(
        config: GatewayConfig,
        catalog: &dyn FieldCatalog,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        let store = Arc::new(StateStore::from_catalog(&config.circuits, catalog));
        let writer = Arc::new(Writer::new(LineConnection::new(config.transport.clone())));
        let (status, _) = watch::channel(Arc::new(DaemonStatus::new()));
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(GatewayInner {
                config,
                store,
                decoder,
                writer,
                status,
                dispatcher: Arc::new(DeviceDispatcher::new()),
                device_socket: Mutex::new(None),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.inner.store
    }

    pub fn circuits(&self) -> &CircuitMap {
        &self.inner.config.circuits
    }

    /// Every tracked key, in stable order.
    pub fn monitors(&self) -> &[CircuitKey] {
        self.inner.store.keys()
    }

    /// `"<label>: <title>"` for a tracked key.
    pub fn entity_name(&self, key: &CircuitKey) -> String {
        self.circuits().entity_name(&key.circuit, &key.field.title)
    }

    /// Latest daemon `info` report.
    pub fn status(&self) -> watch::Receiver<Arc<DaemonStatus>> {
        self.inner.status.subscribe()
    }

    pub fn writer(&self) -> &Arc<Writer> {
        &self.inner.writer
    }

    pub fn devices(&self) -> &Arc<DeviceDispatcher> {
        &self.inner.dispatcher
    }

    /// Send a command to the device gateway. Dropped with a log line if no
    /// gateway is configured or it is not started.
    pub async fn send_device(&self, command: DeviceCommand) {
        match self.inner.device_socket.lock().await.as_ref() {
            Some(socket) => socket.send(command),
            None => warn!(?command, "no device gateway running, command dropped"),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the loops. Calling `start` on a running gateway restarts it.
    pub async fn start(&self) {
        // Held across stop and respawn: starts and shutdowns never interleave.
        let mut handles = self.inner.task_handles.lock().await;
        self.stop_locked(&mut handles).await;

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let config = &self.inner.config;

        handles.push(tokio::spawn(run_monitor(
            LineConnection::new(config.transport.clone()),
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.decoder),
            config.reconnect.clone(),
            child.clone(),
        )));

        if config.poll_enabled() {
            handles.push(tokio::spawn(run_poll(
                LineConnection::new(config.transport.clone()),
                Arc::clone(&self.inner.store),
                Arc::clone(&self.inner.decoder),
                config.poll_settings(),
                config.reconnect.clone(),
                child.clone(),
            )));
        } else {
            info!("polling disabled");
        }

        if config.status_enabled() {
            handles.push(tokio::spawn(run_status(
                LineConnection::new(config.transport.clone()),
                self.inner.status.clone(),
                Arc::clone(&self.inner.store),
                config.status_interval,
                config.reconnect.clone(),
                child.clone(),
            )));
        }

        if let Some(device) = &config.device_gateway {
            let socket = DeviceSocket::connect(
                device.url.clone(),
                device.socket_config(&config.reconnect),
                child.child_token(),
            );
            let rx = socket.subscribe();
            handles.push(tokio::spawn(
                Arc::clone(&self.inner.dispatcher).run(rx, child.clone()),
            ));
            *self.inner.device_socket.lock().await = Some(socket);
            info!(name = %device.name, url = %device.url, "device gateway started");
        }

        info!(
            addr = %config.transport.addr(),
            keys = self.inner.store.len(),
            "gateway started"
        );
    }

    /// Cancel all loops and wait for them to finish. Safe to call when not
    /// started.
    pub async fn shutdown(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        self.stop_locked(&mut handles).await;
        debug!("gateway stopped");
    }

    /// Tear down the current run. The caller holds the `task_handles` lock.
    async fn stop_locked(&self, handles: &mut Vec<JoinHandle<()>>) {
        self.inner.cancel_child.lock().await.cancel();

        if let Some(socket) = self.inner.device_socket.lock().await.take() {
            socket.shutdown();
        }

        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.writer.close().await;
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("addr", &self.inner.config.transport.addr())
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}
