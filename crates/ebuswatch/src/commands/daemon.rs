//! One-shot daemon commands: read, write, info.

use std::sync::Arc;

use ebuswatch_api::{DaemonConnection, LineConnection};
use ebuswatch_config::Config;
use ebuswatch_core::{Decoder, LineDecoder, Writer, parse_info};
use tracing::debug;

use crate::cli::{GlobalOpts, ReadArgs, WriteArgs};
use crate::commands::gateway_config;
use crate::error::CliError;

pub async fn read(args: &ReadArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let transport = gateway_config(config, global)?.transport;
    let timeout = transport.request_timeout;
    let mut conn = LineConnection::new(transport);
    conn.connect().await?;
    let result = conn.read(&args.field, &args.circuit, timeout, true).await;
    conn.disconnect().await;
    let line = result?;

    let decoder = LineDecoder::new(Arc::new(config.field_catalog()), config.unit_table());
    match decoder.decode(&line) {
        Ok(updates) if !updates.is_empty() => {
            for update in updates {
                println!("{} = {}", update.field.title, update.value);
                for (name, value) in &update.attrs {
                    println!("  {name} = {value}");
                }
            }
        }
        Ok(_) => println!("{line}"),
        Err(e) => {
            // Fields outside the catalog are still worth showing raw.
            debug!(error = %e, "reply not decodable");
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn write(args: &WriteArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let transport = gateway_config(config, global)?.transport;
    let writer = Writer::new(LineConnection::new(transport));
    let result = writer.try_write(&args.circuit, &args.field, &args.value).await;
    writer.close().await;
    result?;
    println!("{} {} = {}", args.circuit, args.field, args.value);
    Ok(())
}

pub async fn info(config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let transport = gateway_config(config, global)?.transport;
    let mut conn = LineConnection::new(transport);
    conn.connect().await?;
    let result = conn.info().await;
    conn.disconnect().await;

    for (key, value) in parse_info(&result?) {
        if value.is_empty() {
            println!("{key}");
        } else {
            println!("{key}: {value}");
        }
    }
    Ok(())
}
