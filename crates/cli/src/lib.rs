//! CLI tool for dial-back connections.
//!
//! Provides commands for:
//! - Dialing a server through a manual signaling channel (JSON lines)
//! - Serving requests read from stdin
//! - Running an in-process demonstration

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
