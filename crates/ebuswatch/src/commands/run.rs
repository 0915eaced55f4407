//! `run`: supervise the daemon and print every state change.

use std::sync::Arc;

use chrono::Local;
use ebuswatch_api::DeviceMessage;
use ebuswatch_config::Config;
use ebuswatch_core::{CircuitKey, Gateway, LineDecoder, StateEntry, UnitTable};
use tracing::{info, warn};

use crate::cli::{GlobalOpts, RunArgs};
use crate::commands::gateway_config;
use crate::error::CliError;

pub async fn handle(args: &RunArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let gateway_config = gateway_config(config, global)?;
    let catalog = Arc::new(config.field_catalog());
    let units = Arc::new(config.unit_table());
    let decoder = Arc::new(LineDecoder::new(catalog.clone(), units.as_ref().clone()));
    let gateway = Gateway::new(gateway_config, catalog.as_ref(), decoder);

    if gateway.monitors().is_empty() {
        warn!("no catalog fields for the configured circuits, only daemon status is tracked");
    }

    // Held until shutdown; dropping them unregisters the printers.
    let mut subscriptions = Vec::with_capacity(gateway.monitors().len());
    for key in gateway.monitors().to_vec() {
        let store = Arc::clone(gateway.store());
        let units = Arc::clone(&units);
        let name = gateway.entity_name(&key);
        let json = args.json;
        let observer_key = key.clone();
        subscriptions.push(gateway.store().add_observer(key, move || {
            let line = match store.get(&observer_key) {
                Some(entry) if json => render_json(&observer_key, &name, &entry),
                Some(entry) => render_text(&name, &entry, &units, &observer_key),
                None => String::new(),
            };
            async move {
                if !line.is_empty() {
                    println!("{line}");
                }
                Ok(())
            }
        }));
    }

    if let Some(device) = &gateway.config().device_gateway {
        let name = device.name.clone();
        let json = args.json;
        subscriptions.push(gateway.devices().register_any(move |message| {
            let line = if json {
                render_device_json(&name, &message)
            } else {
                render_device_text(&name, &message)
            };
            async move {
                println!("{line}");
                Ok(())
            }
        }));
    }

    gateway.start().await;

    let mut status = gateway.status();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("interrupted, shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = Arc::clone(&status.borrow_and_update());
                if let Some(signal) = report.get("signal") {
                    info!(signal = %signal, "daemon status");
                }
            }
        }
    }

    gateway.shutdown().await;
    drop(subscriptions);
    Ok(())
}

fn render_text(name: &str, entry: &StateEntry, units: &UnitTable, key: &CircuitKey) -> String {
    let time = entry.updated_at.map_or_else(
        || "--:--:--".to_string(),
        |t| t.with_timezone(&Local).format("%H:%M:%S").to_string(),
    );
    match &entry.value {
        Some(value) if entry.availability.is_available() => {
            let uom = units
                .get(&key.field.unit_name)
                .and_then(|unit| unit.uom.as_deref())
                .map_or_else(String::new, |uom| format!(" {uom}"));
            format!("{time}  {name} = {value}{uom}")
        }
        _ => format!("{time}  {name}: unknown"),
    }
}

fn render_json(key: &CircuitKey, name: &str, entry: &StateEntry) -> String {
    serde_json::json!({
        "circuit": key.circuit,
        "field": key.field_name(),
        "name": name,
        "value": entry.value,
        "attrs": entry.attrs,
        "availability": entry.availability,
        "updated_at": entry.updated_at,
    })
    .to_string()
}

fn render_device_text(gateway: &str, message: &DeviceMessage) -> String {
    let time = Local::now().format("%H:%M:%S");
    let value = match &message.value {
        _ if message.is_lost() => "lost".to_string(),
        Some(value) => value.to_string(),
        None => "unknown".to_string(),
    };
    format!("{time}  {gateway}: {} {} = {value}", message.dev, message.circuit)
}

fn render_device_json(gateway: &str, message: &DeviceMessage) -> String {
    serde_json::json!({
        "gateway": gateway,
        "dev": message.dev,
        "circuit": message.circuit,
        "value": message.value,
        "attrs": message.extra,
    })
    .to_string()
}
