//! Command-line interface module.
//!
//! This module provides the CLI structure and command handlers for the audition binary.

mod commands;
mod context;
mod poll;
mod runs;
mod submit;

pub use commands::{Cli, Commands, OutputFormat};
pub use context::Services;
pub use poll::{poll, reconcile};
pub use runs::{cancel, status};
pub use submit::{SubmitArgs, submit};
