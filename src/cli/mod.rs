//! CLI module for taskbot - command-line interface and subcommands.
//!
//! `run` hosts the bot service; every other subcommand talks to a
//! running service over the admin socket.

pub mod commands;

pub use commands::Cli;
