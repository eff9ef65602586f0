//! # Command modules
//!
//! Each CLI subcommand is serviced by a function in a submodule.  The
//! functions take the parsed argument matches and print to standard
//! output; errors propagate so `main` can exit nonzero.

pub mod dumptape;
pub mod catalog;

/// Enumerates command-level errors
#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("bad command arguments")]
    InvalidCommand,
    #[error("file not suitable for this command")]
    UnsupportedFile
}
