//! Command dispatch: bridges CLI args -> config -> core -> stdout.

pub mod config_cmd;
pub mod daemon;
pub mod probe;
pub mod run;
pub mod switch;

use std::path::PathBuf;

use ebuswatch_config::{Config, config_path, load_config};
use ebuswatch_core::GatewayConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a daemon-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(&args, config, global).await,
        Command::Read(args) => daemon::read(&args, config, global).await,
        Command::Write(args) => daemon::write(&args, config, global).await,
        Command::Info => daemon::info(config, global).await,
        Command::Probe(args) => probe::handle(&args, config, global).await,
        Command::Switch(args) => switch::handle(&args, config, global).await,
        // Config is handled before dispatch
        Command::Config(_) => unreachable!(),
    }
}

/// The config file in effect: `--config` or the platform default.
pub fn active_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load the config and apply the `--host` / `--port` overrides.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut config = load_config(global.config.as_deref())
        .map_err(|e| CliError::config(&active_path(global), e))?;
    if let Some(host) = &global.host {
        config.daemon.host.clone_from(host);
    }
    if let Some(port) = global.port {
        config.daemon.port = port;
    }
    Ok(config)
}

/// Validate the daemon section and build the runtime config.
pub fn gateway_config(config: &Config, global: &GlobalOpts) -> Result<GatewayConfig, CliError> {
    config
        .gateway_config()
        .map_err(|e| CliError::config(&active_path(global), e))
}
