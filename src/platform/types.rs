//! Identifier and payload types shared with the chat platform

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! snowflake {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

snowflake!(
    /// A platform user (a potential candidate)
    UserId
);
snowflake!(ChannelId);
snowflake!(RoleId);
snowflake!(MessageId);

impl UserId {
    /// Inline mention that pings the user
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

impl ChannelId {
    pub fn mention(&self) -> String {
        format!("<#{}>", self.0)
    }
}

impl RoleId {
    pub fn mention(&self) -> String {
        format!("<@&{}>", self.0)
    }
}

/// Where a posted message lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub channel: ChannelId,
    pub message: MessageId,
}

/// One user's reaction with one emoji
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEntry {
    pub user: UserId,
    pub emoji: String,
    pub is_bot: bool,
    /// When the platform says the reaction was added, if it reports one
    pub reacted_at: Option<DateTime<Utc>>,
}

impl ReactionEntry {
    pub fn new(user: UserId, emoji: impl Into<String>) -> Self {
        Self {
            user,
            emoji: emoji.into(),
            is_bot: false,
            reacted_at: None,
        }
    }

    pub fn bot(user: UserId, emoji: impl Into<String>) -> Self {
        Self {
            is_bot: true,
            ..Self::new(user, emoji)
        }
    }

    pub fn at(mut self, reacted_at: DateTime<Utc>) -> Self {
        self.reacted_at = Some(reacted_at);
        self
    }
}

/// A guild member with the roles known at resolution time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub name: String,
    pub roles: Vec<RoleId>,
    pub is_bot: bool,
}

impl Member {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            roles: Vec::new(),
            is_bot: false,
        }
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.push(role);
        self
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    pub fn mention(&self) -> String {
        self.id.mention()
    }
}

/// Result of a role revocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyAbsent,
}

/// Visual tone of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeTone {
    #[default]
    Info,
    Success,
    Warning,
}

impl NoticeTone {
    /// Embed colour as an RGB integer
    pub fn color(&self) -> u32 {
        match self {
            NoticeTone::Info => 0x3498db,
            NoticeTone::Success => 0x2ecc71,
            NoticeTone::Warning => 0xe67e22,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A platform-neutral rich message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Plain text shown above the card (mentions go here so they ping)
    pub content: Option<String>,
    pub title: Option<String>,
    pub description: String,
    pub fields: Vec<NoticeField>,
    pub footer: Option<String>,
    pub tone: NoticeTone,
}

impl Notice {
    /// A plain text message with no card
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A card with a title and description
    pub fn card(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(NoticeField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn with_tone(mut self, tone: NoticeTone) -> Self {
        self.tone = tone;
        self
    }

    /// True if this notice has a card part (title, description or fields)
    pub fn has_card(&self) -> bool {
        self.title.is_some() || !self.description.is_empty() || !self.fields.is_empty()
    }

    /// Everything a reader would see, flattened to one string
    pub fn plain_text(&self) -> String {
        let mut parts = Vec::new();
        if let Some(content) = &self.content {
            parts.push(content.clone());
        }
        if let Some(title) = &self.title {
            parts.push(title.clone());
        }
        if !self.description.is_empty() {
            parts.push(self.description.clone());
        }
        for field in &self.fields {
            parts.push(format!("{}: {}", field.name, field.value));
        }
        if let Some(footer) = &self.footer {
            parts.push(footer.clone());
        }
        parts.join("\n")
    }
}

/// An opened worksheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetHandle {
    pub sheet_id: String,
    /// Title of the first worksheet
    pub worksheet: String,
    pub row_count: u32,
}

/// Reputation scores of an external identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reputation {
    pub link_score: i64,
    pub comment_score: i64,
}

impl Reputation {
    pub fn new(link_score: i64, comment_score: i64) -> Self {
        Self {
            link_score,
            comment_score,
        }
    }

    pub fn total(&self) -> i64 {
        self.link_score + self.comment_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions() {
        assert_eq!(UserId(42).mention(), "<@42>");
        assert_eq!(RoleId(7).mention(), "<@&7>");
        assert_eq!(ChannelId(9).mention(), "<#9>");
    }

    #[test]
    fn test_member_has_role() {
        let member = Member::new(UserId(1), "alice").with_role(RoleId(10));
        assert!(member.has_role(RoleId(10)));
        assert!(!member.has_role(RoleId(11)));
    }

    #[test]
    fn test_notice_plain_text() {
        let notice = Notice::card("Task Available!", "React to claim")
            .with_content("<@&5>")
            .with_field("People Needed", "2", true);
        let text = notice.plain_text();
        assert!(text.contains("<@&5>"));
        assert!(text.contains("Task Available!"));
        assert!(text.contains("People Needed: 2"));
        assert!(notice.has_card());
        assert!(!Notice::text("hi").has_card());
    }

    #[test]
    fn test_reputation_total() {
        assert_eq!(Reputation::new(40, 70).total(), 110);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&UserId(123)).unwrap();
        assert_eq!(json, "123");
        let id: RoleId = serde_json::from_str("456").unwrap();
        assert_eq!(id, RoleId(456));
    }
}
