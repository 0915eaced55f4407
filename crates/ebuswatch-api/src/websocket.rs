//! Device-gateway WebSocket stream with auto-reconnect.
//!
//! Connects to a gateway's `/ws` endpoint, streams parsed
//! [`DeviceMessage`]s through a [`tokio::sync::broadcast`] channel and
//! forwards outgoing [`DeviceCommand`]s. Reconnects with the shared
//! [`Backoff`] policy. Outgoing commands are fire-and-forget: a command
//! issued while the socket is down is logged and dropped.
//!
//! The handshake is bounded by `connect_timeout`. Once connected, a ping
//! goes out after half of `idle_timeout` without traffic; if the rest of
//! the window passes silently too, the connection is dropped and retried.
//!
//! # Example
//!
//! ```rust,ignore
//! use ebuswatch_api::websocket::{DeviceCommand, DeviceSocket, SocketConfig};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let url = Url::parse("ws://192.168.1.20/ws")?;
//! let socket = DeviceSocket::connect(url, SocketConfig::default(), CancellationToken::new());
//! let mut rx = socket.subscribe();
//! socket.send(DeviceCommand::set("relay", "1_01", 1));
//!
//! while let Ok(msg) = rx.recv().await {
//!     println!("{} {} = {:?}", msg.dev, msg.circuit, msg.value);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backoff::{Backoff, ReconnectConfig};
use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

// ── DeviceMessage ────────────────────────────────────────────────────

/// A device snapshot pushed by the gateway.
///
/// Uses `#[serde(flatten)]` to capture everything beyond the routing keys,
/// so full info records (`lost`, `mode`, ...) are not silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMessage {
    /// Device class, e.g. `"relay"`, `"input"`, `"temp"`.
    pub dev: String,

    /// Circuit identifier within the device class, e.g. `"1_01"`.
    pub circuit: String,

    /// Current value, if the message carries one.
    #[serde(default)]
    pub value: Option<serde_json::Value>,

    /// All remaining fields the gateway sends.
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl DeviceMessage {
    /// `true` when a sensor reports it lost contact with its probe.
    pub fn is_lost(&self) -> bool {
        self.extra
            .get("lost")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

// ── DeviceCommand ────────────────────────────────────────────────────

/// An outgoing JSON frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl DeviceCommand {
    /// `{"cmd": "set", "dev": .., "circuit": .., "value": ..}`
    pub fn set(
        dev: impl Into<String>,
        circuit: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            cmd: "set".into(),
            dev: Some(dev.into()),
            circuit: Some(circuit.into()),
            value: Some(value.into()),
        }
    }

    /// `{"cmd": "all"}`: ask for a snapshot of every device.
    pub fn all() -> Self {
        Self {
            cmd: "all".into(),
            dev: None,
            circuit: None,
            value: None,
        }
    }
}

// ── SocketConfig ─────────────────────────────────────────────────────

/// Connection parameters for a [`DeviceSocket`].
#[derive(Debug, Clone, PartialEq)]
pub struct SocketConfig {
    pub reconnect: ReconnectConfig,
    /// Deadline for the TCP connect plus the WebSocket upgrade.
    pub connect_timeout: Duration,
    /// Longest silence tolerated on an open connection.
    pub idle_timeout: Duration,
    /// JSON frames sent verbatim after every successful connect.
    pub init_commands: Vec<serde_json::Value>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
            init_commands: Vec::new(),
        }
    }
}

// ── DeviceSocket ─────────────────────────────────────────────────────

/// Handle to a running device-gateway stream.
///
/// Call [`shutdown`](Self::shutdown) to tear down the background task.
pub struct DeviceSocket {
    message_rx: broadcast::Receiver<Arc<DeviceMessage>>,
    command_tx: mpsc::UnboundedSender<DeviceCommand>,
    cancel: CancellationToken,
}

impl DeviceSocket {
    /// Spawn the reconnection loop and return immediately.
    pub fn connect(url: Url, config: SocketConfig, cancel: CancellationToken) -> Self {
        let (message_tx, message_rx) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(url, message_tx, command_rx, config, task_cancel).await;
        });

        Self {
            message_rx,
            command_tx,
            cancel,
        }
    }

    /// Get a new broadcast receiver for the message stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DeviceMessage>> {
        self.message_rx.resubscribe()
    }

    /// Queue a command for the gateway. Never fails; see module docs.
    pub fn send(&self, command: DeviceCommand) {
        if self.command_tx.send(command).is_err() {
            tracing::error!("Send failed, device socket task has stopped");
        }
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read/write → on error, backoff → reconnect.
async fn ws_loop(
    url: Url,
    message_tx: broadcast::Sender<Arc<DeviceMessage>>,
    mut command_rx: mpsc::UnboundedReceiver<DeviceCommand>,
    config: SocketConfig,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(config.reconnect.clone());

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_run(
                &url,
                &message_tx,
                &mut command_rx,
                &config,
                &mut backoff,
                &cancel,
            ) => result,
        };

        if cancel.is_cancelled() {
            break;
        }

        let step = backoff.fail();
        match result {
            Ok(()) => tracing::info!(
                url = %url,
                delay_s = step.delay.as_secs(),
                "Device socket closed, reconnecting"
            ),
            Err(e) => tracing::error!(
                url = %url,
                error = %e,
                delay_s = step.delay.as_secs(),
                "Device socket failed, retrying"
            ),
        }

        if !wait_dropping_commands(step.delay, &mut command_rx, &cancel).await {
            break;
        }
    }

    tracing::debug!("Device socket loop exiting");
}

/// Sleep out the backoff delay, discarding commands that cannot be sent.
///
/// Returns `false` if cancelled.
async fn wait_dropping_commands(
    delay: Duration,
    command_rx: &mut mpsc::UnboundedReceiver<DeviceCommand>,
    cancel: &CancellationToken,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            () = &mut sleep => return true,
            command = command_rx.recv() => {
                let Some(command) = command else { return true };
                tracing::error!(?command, "Send failed, connection is broken");
            }
        }
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_run(
    url: &Url,
    message_tx: &broadcast::Sender<Arc<DeviceMessage>>,
    command_rx: &mut mpsc::UnboundedReceiver<DeviceCommand>,
    config: &SocketConfig,
    backoff: &mut Backoff,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::debug!(url = %url, "Connecting to device gateway");

    let (ws_stream, _response) =
        tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| Error::timeout(config.connect_timeout))?
            .map_err(|e| Error::Connect {
                addr: url.to_string(),
                reason: e.to_string(),
            })?;

    let (mut write, mut read) = ws_stream.split();

    for init in &config.init_commands {
        write
            .send(Message::text(init.to_string()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
    }

    tracing::info!(url = %url, "Connected successfully to device gateway");
    backoff.reset();

    // Half the idle window, twice: once before the ping, once after.
    let half_idle = config.idle_timeout / 2;
    let idle = tokio::time::sleep(half_idle);
    tokio::pin!(idle);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            () = &mut idle => {
                if awaiting_pong {
                    tracing::warn!(
                        idle_s = config.idle_timeout.as_secs(),
                        "Device gateway went silent"
                    );
                    return Err(Error::timeout(config.idle_timeout));
                }
                tracing::trace!("Keepalive ping");
                write
                    .send(Message::Ping(Vec::new().into()))
                    .await
                    .map_err(|e| Error::WebSocket(e.to_string()))?;
                awaiting_pong = true;
                idle.as_mut().reset(Instant::now() + half_idle);
            }
            command = command_rx.recv() => {
                let Some(command) = command else { return Ok(()) };
                let payload = serde_json::to_string(&command)?;
                tracing::debug!(payload = %payload, "Send");
                if let Err(e) = write.send(Message::text(payload)).await {
                    tracing::error!(error = %e, "Send failed");
                    return Err(Error::WebSocket(e.to_string()));
                }
            }
            frame = read.next() => {
                awaiting_pong = false;
                idle.as_mut().reset(Instant::now() + half_idle);
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(text = %text.as_str(), "Receive");
                        parse_and_broadcast(&text, message_tx);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "Device gateway close frame received"
                            );
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Receive failed");
                        return Err(Error::WebSocket(e.to_string()));
                    }
                    None => return Err(Error::Closed),
                    // Binary, Ping, Pong, Frame -- ignore; tungstenite answers pings
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Decode a text frame holding one object or an array of objects.
pub fn parse_messages(text: &str) -> Result<Vec<DeviceMessage>, Error> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let items = match raw {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<DeviceMessage>(item) {
            Ok(msg) => messages.push(msg),
            Err(e) => tracing::debug!(error = %e, "Skipping frame entry without dev/circuit"),
        }
    }
    Ok(messages)
}

fn parse_and_broadcast(text: &str, message_tx: &broadcast::Sender<Arc<DeviceMessage>>) {
    match parse_messages(text) {
        Ok(messages) => {
            for msg in messages {
                // Ignore send errors -- just means no active subscribers right now
                let _ = message_tx.send(Arc::new(msg));
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to parse device gateway frame"),
    }
}

// ── Probe ────────────────────────────────────────────────────────────

/// Check that `url` is a device gateway.
///
/// Sends `{"cmd": "all"}` and succeeds iff the first text frame is an array
/// containing at least one object with `dev` and `circuit`.
pub async fn probe(url: &Url, timeout: Duration) -> Result<(), Error> {
    tokio::time::timeout(timeout, probe_inner(url))
        .await
        .map_err(|_| Error::timeout(timeout))?
}

async fn probe_inner(url: &Url) -> Result<(), Error> {
    let (mut ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::Connect {
            addr: url.to_string(),
            reason: e.to_string(),
        })?;

    let all = serde_json::to_string(&DeviceCommand::all())?;
    ws_stream
        .send(Message::text(all))
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))?;

    let result = loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => break looks_like_snapshot(&text),
            Some(Ok(Message::Close(_))) | None => break Err(Error::Closed),
            Some(Err(e)) => break Err(Error::WebSocket(e.to_string())),
            Some(Ok(_)) => {}
        }
    };

    // Best effort: the verdict is already known.
    let _ = ws_stream.close(None).await;
    result
}

fn looks_like_snapshot(text: &str) -> Result<(), Error> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let found = raw.as_array().is_some_and(|items| {
        items.iter().any(|item| {
            item.as_object()
                .is_some_and(|obj| obj.contains_key("dev") && obj.contains_key("circuit"))
        })
    });
    if found {
        Ok(())
    } else {
        Err(Error::Protocol("reply is not a device snapshot".into()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
