//! Platform Layer - the external collaborators the allocation core talks to
//!
//! This module provides:
//! - Identifier and payload types shared with the chat platform
//! - Capability traits: Messaging, Membership, LedgerStore, ReputationSource
//! - A MockPlatform for tests
//! - REST adapters for Discord, Google Sheets and Reddit

pub mod discord;
pub mod mock;
pub mod reddit;
pub mod sheets;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

pub use discord::{DiscordClient, DiscordConfig};
pub use mock::MockPlatform;
pub use reddit::{RedditClient, RedditConfig};
pub use sheets::{SheetsClient, SheetsConfig, extract_sheet_id};
pub use types::{
    ChannelId, Member, MessageHandle, MessageId, Notice, NoticeField, NoticeTone, ReactionEntry, Reputation, RevokeOutcome,
    RoleId, SheetHandle, UserId,
};

/// Messages, reactions and private delivery
#[async_trait]
pub trait Messaging: Send + Sync {
    /// Post an announcement and return a handle to it
    async fn send_announcement(&self, channel: ChannelId, notice: &Notice) -> Result<MessageHandle, PlatformError>;

    /// React to a message as the bot
    async fn add_reaction(&self, message: &MessageHandle, emoji: &str) -> Result<(), PlatformError>;

    /// All reactions currently attached to a message, one entry per (user, emoji)
    async fn fetch_reactions(&self, message: &MessageHandle) -> Result<Vec<ReactionEntry>, PlatformError>;

    /// Deliver a private message; `Refused` when the recipient does not accept them
    async fn send_private(&self, user: UserId, notice: &Notice) -> Result<(), PlatformError>;

    /// Post a public message
    async fn send_public(&self, channel: ChannelId, notice: &Notice) -> Result<MessageHandle, PlatformError>;

    /// Remove a message the bot posted
    async fn delete_message(&self, message: &MessageHandle) -> Result<(), PlatformError>;
}

/// Guild membership and role mutation
#[async_trait]
pub trait Membership: Send + Sync {
    /// Resolve a user to a guild member, `None` if they are not in the guild
    async fn resolve_member(&self, user: UserId) -> Result<Option<Member>, PlatformError>;

    async fn grant_role(&self, member: &Member, role: RoleId, reason: &str) -> Result<(), PlatformError>;

    async fn revoke_role(&self, member: &Member, role: RoleId, reason: &str) -> Result<RevokeOutcome, PlatformError>;

    /// Look a role up by name without creating it
    async fn find_role(&self, name: &str) -> Result<Option<RoleId>, PlatformError>;

    async fn get_or_create_role(&self, name: &str) -> Result<RoleId, PlatformError>;

    /// Every member currently holding a role
    async fn members_with_role(&self, role: RoleId) -> Result<Vec<Member>, PlatformError>;
}

/// The external spreadsheet of record
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn open_sheet(&self, url: &str) -> Result<SheetHandle, PlatformError>;

    /// Write one cell. Rows and columns are 1-based.
    async fn write_cell(&self, sheet: &SheetHandle, row: u32, col: u32, value: &str) -> Result<(), PlatformError>;
}

/// External identity reputation lookup
#[async_trait]
pub trait ReputationSource: Send + Sync {
    async fn lookup_reputation(&self, username: &str) -> Result<Reputation, PlatformError>;
}

/// The full set of collaborators handed to the daemon
#[derive(Clone)]
pub struct Collaborators {
    pub messaging: Arc<dyn Messaging>,
    pub membership: Arc<dyn Membership>,
    pub ledger: Arc<dyn LedgerStore>,
    pub reputation: Arc<dyn ReputationSource>,
}

impl Collaborators {
    /// Use one mock for every capability
    pub fn from_mock(mock: Arc<MockPlatform>) -> Self {
        Self {
            messaging: mock.clone(),
            membership: mock.clone(),
            ledger: mock.clone(),
            reputation: mock,
        }
    }
}

/// Errors reported by external collaborators
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Private delivery refused by the recipient
    #[error("Refused: {0}")]
    Refused(String),

    #[error("Row {row} is out of bounds (sheet has {rows} rows)")]
    OutOfBounds { row: u32, rows: u32 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PlatformError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Transient(_) => true,
            PlatformError::Http(_) => true,
            PlatformError::Api { status, .. } => *status == 429 || *status >= 500,
            PlatformError::Forbidden(_)
            | PlatformError::NotFound(_)
            | PlatformError::Refused(_)
            | PlatformError::OutOfBounds { .. }
            | PlatformError::InvalidUrl(_)
            | PlatformError::NotConfigured(_) => false,
        }
    }

    /// Map an HTTP status to the error taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            403 => PlatformError::Forbidden(message),
            404 => PlatformError::NotFound(message),
            429 | 500..=599 => PlatformError::Transient(format!("{}: {}", status, message)),
            _ => PlatformError::Api { status, message },
        }
    }
}
