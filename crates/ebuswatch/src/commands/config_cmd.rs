//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::commands::{active_path, load};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", active_path(global).display());
            Ok(())
        }
        ConfigCommand::Show => {
            let config = load(global)?;
            let rendered = config
                .to_toml()
                .map_err(|e| CliError::config(&active_path(global), e))?;
            print!("{rendered}");
            Ok(())
        }
    }
}
