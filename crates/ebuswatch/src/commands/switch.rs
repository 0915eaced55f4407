//! `switch`: drive one digital output on the device gateway.

use std::sync::Arc;
use std::time::Duration;

use ebuswatch_api::{DeviceCommand, DeviceMessage, DeviceSocket, ReconnectConfig};
use ebuswatch_config::Config;
use ebuswatch_core::{norm_circuit, set_output};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::{GlobalOpts, SwitchArgs};
use crate::commands::active_path;
use crate::error::CliError;

pub async fn handle(args: &SwitchArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let Some(section) = &config.device_gateway else {
        return Err(CliError::NoDeviceGateway {
            path: active_path(global).display().to_string(),
        });
    };
    let device = section
        .to_runtime()
        .map_err(|e| CliError::config(&active_path(global), e))?;

    let circuit = norm_circuit(&args.circuit);
    let command = set_output(&args.dev, &circuit, args.state.is_on(), args.negate);
    debug!(?command, url = %device.url, "switching output");

    let socket = DeviceSocket::connect(
        device.url.clone(),
        device.socket_config(&ReconnectConfig::default()),
        CancellationToken::new(),
    );
    let mut rx = socket.subscribe();
    socket.send(command);
    // The snapshot that follows reports the output after the set.
    socket.send(DeviceCommand::all());

    let timeout = Duration::from_secs(args.timeout);
    let reported = tokio::time::timeout(timeout, wait_for(&mut rx, &args.dev, &circuit)).await;
    socket.shutdown();

    match reported {
        Ok(Some(message)) => {
            let value = message
                .value
                .as_ref()
                .map_or_else(|| "unknown".to_string(), ToString::to_string);
            println!("{}: {} {} = {value}", device.name, message.dev, message.circuit);
            Ok(())
        }
        Ok(None) => Err(CliError::Disconnected {
            reason: format!("{} closed the stream", device.name),
        }),
        Err(_) => Err(CliError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// First message for `(dev, circuit)`, or `None` once the stream is gone.
async fn wait_for(
    rx: &mut broadcast::Receiver<Arc<DeviceMessage>>,
    dev: &str,
    circuit: &str,
) -> Option<Arc<DeviceMessage>> {
    loop {
        match rx.recv().await {
            Ok(message) if message.dev == dev && message.circuit == circuit => return Some(message),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return None,
        }
    }
}
