//! Line-oriented client for the ebusd TCP protocol.
//!
//! ebusd speaks plain text: one command per line, and every reply is a block
//! of lines terminated by an empty line. Errors are reported in-band as
//! `ERR: <message>`. After `listen` the connection additionally streams one
//! line per changed value until it is closed.
//!
//! [`DaemonConnection`] is the seam the core loops are written against;
//! [`LineConnection`] is the TCP implementation.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace};

use crate::error::Error;
use crate::transport::TransportConfig;

const ERR_PREFIX: &str = "ERR:";

// ── DaemonConnection ─────────────────────────────────────────────────

/// A single reconnectable connection to the bus daemon.
///
/// Implementations own at most one socket at a time. `disconnect` must be
/// safe to call in any state and must never fail.
pub trait DaemonConnection: Send {
    /// Open the socket. Replaces any previous socket.
    fn connect(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Close the socket if open.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// Ask the daemon to stream every value change on this connection.
    fn start_listening(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Block for the next streamed line (after [`start_listening`](Self::start_listening)).
    fn read_line(&mut self) -> impl Future<Output = Result<String, Error>> + Send;

    /// Explicitly read `field` on `circuit`, bypassing the daemon cache.
    ///
    /// With `verbose` the reply carries circuit and field name in the same
    /// shape as a streamed line.
    fn read(
        &mut self,
        field: &str,
        circuit: &str,
        timeout: Duration,
        verbose: bool,
    ) -> impl Future<Output = Result<String, Error>> + Send;

    /// Write `value` to `field` on `circuit`.
    fn write(
        &mut self,
        field: &str,
        circuit: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Daemon status report as raw `key: value` lines.
    fn info(&mut self) -> impl Future<Output = Result<Vec<String>, Error>> + Send;
}

// ── LineConnection ───────────────────────────────────────────────────

/// TCP implementation of [`DaemonConnection`].
pub struct LineConnection {
    config: TransportConfig,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl LineConnection {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            reader: None,
            writer: None,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Connect unless a socket is already open.
    pub async fn ensure_connected(&mut self) -> Result<(), Error> {
        if self.is_connected() {
            return Ok(());
        }
        self.open().await
    }

    async fn open(&mut self) -> Result<(), Error> {
        self.close().await;

        let addr = self.config.addr();
        debug!(addr = %addr, "connecting to ebusd");

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| Error::timeout(self.config.connect_timeout))?
        .map_err(|e| Error::Connect {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);
        debug!(addr = %addr, "connected to ebusd");
        Ok(())
    }

    async fn close(&mut self) {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            // Best effort: the peer may already be gone.
            let _ = writer.shutdown().await;
        }
    }

    async fn send_line(&mut self, command: &str) -> Result<(), Error> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        trace!(command, "send");
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one raw line, without the trailing line terminator.
    async fn next_line(&mut self, deadline: Duration) -> Result<String, Error> {
        let reader = self.reader.as_mut().ok_or(Error::NotConnected)?;
        let mut buf = String::new();
        let read = tokio::time::timeout(deadline, reader.read_line(&mut buf))
            .await
            .map_err(|_| Error::timeout(deadline))??;
        if read == 0 {
            return Err(Error::Closed);
        }
        let line = buf.trim_end_matches(['\r', '\n']).to_owned();
        trace!(line = %line, "receive");
        Ok(line)
    }

    /// Read a reply block up to (excluding) its terminating empty line.
    async fn read_reply(&mut self, deadline: Duration) -> Result<Vec<String>, Error> {
        let started = tokio::time::Instant::now();
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(Error::timeout(deadline));
            }
            let line = self.next_line(remaining).await?;
            if line.is_empty() {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    async fn request(&mut self, command: &str, deadline: Duration) -> Result<Vec<String>, Error> {
        self.send_line(command).await?;
        let lines = self.read_reply(deadline).await?;
        check_reply(lines)
    }
}

impl DaemonConnection for LineConnection {
    async fn connect(&mut self) -> Result<(), Error> {
        self.open().await
    }

    async fn disconnect(&mut self) {
        self.close().await;
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.reader.is_some()
    }

    async fn start_listening(&mut self) -> Result<(), Error> {
        let deadline = self.config.request_timeout;
        let lines = self.request("listen", deadline).await?;
        debug!(reply = ?lines, "listen acknowledged");
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, Error> {
        let deadline = self.config.idle_timeout;
        loop {
            let line = self.next_line(deadline).await?;
            if !line.is_empty() {
                return Ok(line);
            }
        }
    }

    async fn read(
        &mut self,
        field: &str,
        circuit: &str,
        timeout: Duration,
        verbose: bool,
    ) -> Result<String, Error> {
        let command = read_command(field, circuit, verbose);
        let lines = self.request(&command, timeout).await?;
        lines
            .into_iter()
            .next()
            .ok_or_else(|| Error::Protocol(format!("empty reply to '{command}'")))
    }

    async fn write(&mut self, field: &str, circuit: &str, value: &str) -> Result<(), Error> {
        let command = format!("write -c {circuit} {field} {value}");
        let deadline = self.config.request_timeout;
        self.request(&command, deadline).await?;
        Ok(())
    }

    async fn info(&mut self) -> Result<Vec<String>, Error> {
        let deadline = self.config.request_timeout;
        self.request("info", deadline).await
    }
}

// ── Protocol helpers ─────────────────────────────────────────────────

/// `-m 0` forces the daemon to query the bus instead of answering from cache.
fn read_command(field: &str, circuit: &str, verbose: bool) -> String {
    if verbose {
        format!("read -v -m 0 -c {circuit} {field}")
    } else {
        format!("read -m 0 -c {circuit} {field}")
    }
}

/// Turn an in-band `ERR:` reply into [`Error::Command`].
fn check_reply(lines: Vec<String>) -> Result<Vec<String>, Error> {
    let message = lines
        .first()
        .and_then(|first| first.strip_prefix(ERR_PREFIX))
        .map(|rest| rest.trim().to_owned());
    match message {
        Some(message) => Err(Error::Command { message }),
        None => Ok(lines),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
