//! Device gateway probe.

use std::time::Duration;

use ebuswatch_config::Config;

use crate::cli::{GlobalOpts, ProbeArgs};
use crate::commands::active_path;
use crate::error::CliError;

pub async fn handle(args: &ProbeArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let Some(section) = &config.device_gateway else {
        return Err(CliError::NoDeviceGateway {
            path: active_path(global).display().to_string(),
        });
    };
    let url = section
        .url()
        .map_err(|e| CliError::config(&active_path(global), e))?;

    ebuswatch_api::websocket::probe(&url, Duration::from_secs(args.timeout)).await?;
    println!("{} at {url} answered with a device snapshot", section.name);
    Ok(())
}
