//! Clap derive structures for the `ebuswatch` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ebuswatch -- keep an eye on an ebusd heating bus
#[derive(Debug, Parser)]
#[command(
    name = "ebuswatch",
    version,
    about = "Watch and control an ebusd heating bus",
    long_about = "Follows an ebusd daemon's live stream, polls the fields it does not\n\
        report on its own, and prints every change.\n\n\
        One-shot commands read, write and inspect the daemon directly.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "EBUSWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Daemon host (overrides the config file)
    #[arg(long, short = 'H', global = true)]
    pub host: Option<String>,

    /// Daemon port (overrides the config file)
    #[arg(long, short = 'P', global = true)]
    pub port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Supervise the daemon and print every update until Ctrl-C
    Run(RunArgs),

    /// Read one field from the bus
    Read(ReadArgs),

    /// Write a value to one field
    Write(WriteArgs),

    /// Show the daemon's info report
    Info,

    /// Check that the device gateway answers with a device snapshot
    Probe(ProbeArgs),

    /// Switch a digital output on the device gateway
    Switch(SwitchArgs),

    /// Inspect the configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Print updates as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Circuit identifier, e.g. "bai"
    pub circuit: String,

    /// Field name, e.g. "FlowTemp"
    pub field: String,
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    pub circuit: String,
    pub field: String,
    /// Raw value as the daemon expects it
    pub value: String,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Seconds to wait for the snapshot
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

#[derive(Debug, Args)]
pub struct SwitchArgs {
    /// Device class, e.g. "relay" or "do"
    pub dev: String,

    /// Circuit, e.g. "1.01" or "2_03"
    pub circuit: String,

    pub state: SwitchState,

    /// The output is wired inverted
    #[arg(long)]
    pub negate: bool,

    /// Seconds to wait for the gateway to report the output
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,
    /// Print the effective configuration
    Show,
}
