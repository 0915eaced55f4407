// ── Write path ──
//
// Fire-and-forget value writes over a dedicated, lazily opened connection.
// Writes never update the State Store; new values come back through the
// Monitor and Poll loops.

use ebuswatch_api::{DaemonConnection, Error, LineConnection};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Serializes writes over one autoconnecting connection.
pub struct Writer<C = LineConnection> {
    conn: Mutex<C>,
}

impl<C> Writer<C>
where
    C: DaemonConnection,
{
    pub fn new(conn: C) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Write `value` to `field` on `circuit`. Failures are logged and
    /// swallowed.
    pub async fn write(&self, circuit: &str, field: &str, value: &str) {
        if let Err(e) = self.try_write(circuit, field, value).await {
            error!(circuit, field, value, error = %e, "write failed");
        }
    }

    /// Like [`write`](Self::write) but returns the error.
    ///
    /// A transport failure closes the connection so the next write
    /// reconnects.
    pub async fn try_write(&self, circuit: &str, field: &str, value: &str) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        if !conn.is_connected() {
            conn.connect().await?;
        }
        let result = conn.write(field, circuit, value).await;
        match &result {
            Ok(()) => debug!(circuit, field, value, "write done"),
            Err(e) if e.is_transport() => conn.disconnect().await,
            Err(_) => {}
        }
        result
    }

    /// Close the connection if open.
    pub async fn close(&self) {
        self.conn.lock().await.disconnect().await;
    }
}
