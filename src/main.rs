//! # Command Line Interface
//!
//! Dispatch commands to the `commands` module.

use env_logger;
use dckit::commands;
mod cli;

fn main() -> Result<(),Box<dyn std::error::Error>>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let main_cmd = cli::build_cli();
    let matches = main_cmd.get_matches();

    // Dump the blocks of a cassette image

    if let Some(cmd) = matches.subcommand_matches("dumptape") {
        return commands::dumptape::dump(cmd);
    }

    // Catalog a disk image

    if let Some(cmd) = matches.subcommand_matches("catalog") {
        return commands::catalog::catalog(cmd);
    }

    Ok(())
}
