//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start the bot service in the foreground
//! - start/pause/resume/stop: batch lifecycle
//! - configure: runtime settings
//! - assign/verify: member operations
//! - status/ping: inspection

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskbot::allocation::{BatchRequest, SettingsOverride};
use taskbot::platform::{ChannelId, RoleId};

/// Taskbot - hands out tasks to community members on a timer
#[derive(Parser, Debug)]
#[command(name = "taskbot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Admin socket path (overrides config)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bot service in the foreground
    Run,

    /// Start a new task batch and the allocation loop
    Start {
        /// Number of tasks in the batch
        #[arg(short, long)]
        tasks: u32,

        /// Batch label, e.g. "upvote" or "comment"
        #[arg(short, long)]
        label: String,

        /// Winners per round (defaults to the configured value)
        #[arg(short, long)]
        winners: Option<u32>,

        /// Text shown in announcements
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Pause the allocation loop
    Pause,

    /// Resume a paused allocation loop
    Resume,

    /// Stop the allocation loop
    Stop,

    /// Show the bot's current state
    Status,

    /// Update runtime settings
    Configure {
        /// Minutes between rounds
        #[arg(long)]
        interval_minutes: Option<u64>,

        /// Seconds a round stays open for reactions (1-60)
        #[arg(long)]
        reaction_seconds: Option<u64>,

        /// Hours until the task role is revoked (1-168)
        #[arg(long)]
        removal_hours: Option<u64>,

        /// Channel for round announcements
        #[arg(long)]
        announce_channel: Option<u64>,

        /// Channel for operational notices
        #[arg(long)]
        logs_channel: Option<u64>,

        /// Channel for verification summaries
        #[arg(long)]
        verification_channel: Option<u64>,

        /// Spreadsheet URL for the task ledger
        #[arg(long)]
        sheet_url: Option<String>,

        /// Role pinged when a round opens
        #[arg(long)]
        ping_role: Option<u64>,
    },

    /// Manually assign a task to a member
    Assign {
        /// Task number within the current batch
        #[arg(short, long)]
        task: u32,

        /// Member user id
        #[arg(short, long)]
        user: u64,
    },

    /// Verify a member against their Reddit reputation
    Verify {
        /// Member user id
        #[arg(short, long)]
        user: u64,

        /// Reddit username (with or without the u/ prefix)
        #[arg(short, long)]
        reddit: String,
    },

    /// Check that the bot service is responsive
    Ping,
}

impl Commands {
    /// Batch parameters for `start`
    pub fn batch_request(&self) -> Option<BatchRequest> {
        match self {
            Commands::Start {
                tasks,
                label,
                winners,
                description,
            } => Some(BatchRequest {
                total_tasks: *tasks,
                label: label.clone(),
                winners_per_round: *winners,
                description: description.clone(),
            }),
            _ => None,
        }
    }

    /// Settings update for `configure`
    pub fn settings_override(&self) -> Option<SettingsOverride> {
        match self {
            Commands::Configure {
                interval_minutes,
                reaction_seconds,
                removal_hours,
                announce_channel,
                logs_channel,
                verification_channel,
                sheet_url,
                ping_role,
            } => Some(SettingsOverride {
                interval_minutes: *interval_minutes,
                reaction_seconds: *reaction_seconds,
                removal_hours: *removal_hours,
                announce_channel: announce_channel.map(ChannelId),
                logs_channel: logs_channel.map(ChannelId),
                verification_channel: verification_channel.map(ChannelId),
                sheet_url: sheet_url.clone(),
                ping_role: ping_role.map(RoleId),
            }),
            _ => None,
        }
    }
}
