//! Command-line interface.

mod commands;
mod helpers;
mod progress;

pub use commands::{exit_code_for, is_verbose, run};
