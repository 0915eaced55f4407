#![allow(clippy::unwrap_used)]
// Scripted in-memory `DaemonConnection` for loop tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ebuswatch_api::{DaemonConnection, Error};
use tokio::time::Instant;

use crate::catalog::StaticCatalog;
use crate::decoder::LineDecoder;
use crate::model::{CircuitKey, FieldDescriptor};
use crate::store::StateStore;
use crate::units::UnitTable;

/// What the fake daemon answers.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Line(String),
    Command(String),
    Closed,
}

impl Reply {
    pub(crate) fn line(s: &str) -> Self {
        Self::Line(s.to_owned())
    }

    fn into_result(self) -> Result<String, Error> {
        match self {
            Self::Line(line) => Ok(line),
            Self::Command(message) => Err(Error::Command { message }),
            Self::Closed => Err(Error::Closed),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Fail this many connect attempts before succeeding.
    pub fail_connects: usize,
    pub connect_attempts: Vec<Instant>,
    pub disconnects: usize,
    pub connected: bool,
    /// Lines streamed after `listen`. Empty means "block forever".
    pub stream: VecDeque<Reply>,
    /// Answers to `read`, by `(circuit, field)`. Missing means `Closed`.
    pub replies: HashMap<(String, String), Reply>,
    pub reads: Vec<(String, String, Instant)>,
    pub writes: Vec<(String, String, String)>,
    pub info: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
}

#[allow(clippy::unwrap_used)]
impl MockConnection {
    pub(crate) fn with(f: impl FnOnce(&mut MockState)) -> Self {
        let conn = Self::default();
        f(&mut conn.state.lock().unwrap());
        conn
    }

    pub(crate) fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Seconds between consecutive connect attempts.
    pub(crate) fn connect_gaps(&self) -> Vec<u64> {
        let attempts = self.state().connect_attempts.clone();
        attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }
}

#[allow(clippy::unwrap_used)]
impl DaemonConnection for MockConnection {
    async fn connect(&mut self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts.push(Instant::now());
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(Error::Connect {
                addr: "mock:8888".into(),
                reason: "connection refused".into(),
            });
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.connected {
            state.disconnects += 1;
        }
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn start_listening(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, Error> {
        let next = self.state.lock().unwrap().stream.pop_front();
        match next {
            Some(reply) => reply.into_result(),
            None => std::future::pending().await,
        }
    }

    async fn read(
        &mut self,
        field: &str,
        circuit: &str,
        _timeout: Duration,
        _verbose: bool,
    ) -> Result<String, Error> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            state
                .reads
                .push((circuit.to_owned(), field.to_owned(), Instant::now()));
            state
                .replies
                .get(&(circuit.to_owned(), field.to_owned()))
                .cloned()
                .unwrap_or(Reply::Closed)
        };
        reply.into_result()
    }

    async fn write(&mut self, field: &str, circuit: &str, value: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state
            .writes
            .push((circuit.to_owned(), field.to_owned(), value.to_owned()));
        Ok(())
    }

    async fn info(&mut self) -> Result<Vec<String>, Error> {
        Ok(self.state.lock().unwrap().info.clone())
    }
}

/// `bai` circuit with a status field, two pollable fields and their store.
pub(crate) struct Fixture {
    pub store: Arc<StateStore>,
    pub decoder: Arc<LineDecoder>,
    pub flow: CircuitKey,
    pub pressure: CircuitKey,
    pub hours: CircuitKey,
}

pub(crate) fn fixture() -> Fixture {
    let flow = FieldDescriptor::new("FlowTemp", "Flow temperature", "temp").status();
    let pressure = FieldDescriptor::new("WaterPressure", "Water pressure", "pressure");
    let hours = FieldDescriptor::new("Hours", "Burner hours", "hours");
    let catalog = StaticCatalog::new()
        .with_field("bai", flow.clone())
        .with_field("bai", pressure.clone())
        .with_field("bai", hours.clone());

    let flow = CircuitKey::new("bai", Arc::new(flow));
    let pressure = CircuitKey::new("bai", Arc::new(pressure));
    let hours = CircuitKey::new("bai", Arc::new(hours));
    Fixture {
        store: Arc::new(StateStore::new([flow.clone(), pressure.clone(), hours.clone()])),
        decoder: Arc::new(LineDecoder::new(Arc::new(catalog), UnitTable::builtin())),
        flow,
        pressure,
        hours,
    }
}
