//! Command-line peer for webrpc.
//!
//! This crate provides the `webrpc` binary: a demo server exposing a few
//! functions and a pipe on a Unix socket, and client commands to call
//! functions, read and write values, and round-trip data through a pipe.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use error::{CliError, CliResult};
