//! Taskbot - a community task giveaway bot
//!
//! Taskbot runs a timed allocation cycle: each round it announces the next
//! tasks, collects reactions for a short window, picks winners among eligible
//! members, grants them a temporary role and records the result in a ledger.

pub mod allocation;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod platform;
pub mod verify;

pub use error::{Result, TaskbotError};
