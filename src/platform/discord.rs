//! Discord REST adapter
//!
//! Implements Messaging and Membership over the Discord v10 HTTP API.
//! Reaction observation is done by polling; no gateway connection is held.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{
    ChannelId, Member, MessageHandle, MessageId, Messaging, Membership, Notice, PlatformError, ReactionEntry, RevokeOutcome,
    RoleId, UserId,
};

/// Default Discord API base URL
pub const DISCORD_API_URL: &str = "https://discord.com/api/v10";

/// Page size for member and reaction listings
const PAGE_LIMIT: usize = 100;

/// Configuration for the Discord client
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub api_base: String,
    pub guild_id: u64,
    pub timeout: Duration,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: DISCORD_API_URL.to_string(),
            guild_id: 0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Discord REST client scoped to one guild
pub struct DiscordClient {
    client: Client,
    token: String,
    config: DiscordConfig,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordMember {
    user: DiscordUser,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordRole {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DiscordEmoji {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordReaction {
    emoji: DiscordEmoji,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    #[serde(default)]
    reactions: Vec<DiscordReaction>,
}

#[derive(Debug, Deserialize)]
struct DiscordChannel {
    id: String,
}

impl DiscordClient {
    /// Create a client with an explicit bot token
    pub fn with_token(token: String, config: DiscordConfig) -> Result<Self, PlatformError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, token, config })
    }

    /// Create a client reading the bot token from an environment variable
    pub fn from_env(token_env: &str, config: DiscordConfig) -> Result<Self, PlatformError> {
        let token = std::env::var(token_env)
            .map_err(|_| PlatformError::NotConfigured(format!("{} environment variable is required", token_env)))?;
        Self::with_token(token, config)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.config.api_base, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, PlatformError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::from_status(status.as_u16(), body))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, PlatformError> {
        let response = self.send(builder).await?;
        Ok(response.json::<T>().await?)
    }

    fn guild_path(&self, rest: &str) -> String {
        format!("/guilds/{}{}", self.config.guild_id, rest)
    }

    async fn post_message(&self, channel: ChannelId, notice: &Notice) -> Result<DiscordMessage, PlatformError> {
        let builder = self
            .request(Method::POST, &format!("/channels/{}/messages", channel))
            .json(&render_notice(notice));
        self.send_json(builder).await
    }

    async fn list_roles(&self) -> Result<Vec<DiscordRole>, PlatformError> {
        self.send_json(self.request(Method::GET, &self.guild_path("/roles")))
            .await
    }

    async fn reaction_users(&self, message: &MessageHandle, emoji: &str) -> Result<Vec<DiscordUser>, PlatformError> {
        let mut users = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut path = format!(
                "/channels/{}/messages/{}/reactions/{}?limit={}",
                message.channel,
                message.message,
                encode_path_segment(emoji),
                PAGE_LIMIT
            );
            if let Some(after) = &after {
                path.push_str(&format!("&after={}", after));
            }
            let page: Vec<DiscordUser> = self.send_json(self.request(Method::GET, &path)).await?;
            let count = page.len();
            after = page.last().map(|u| u.id.clone());
            users.extend(page);
            if count < PAGE_LIMIT {
                break;
            }
        }
        Ok(users)
    }
}

#[async_trait]
impl Messaging for DiscordClient {
    async fn send_announcement(&self, channel: ChannelId, notice: &Notice) -> Result<MessageHandle, PlatformError> {
        let message = self.post_message(channel, notice).await?;
        Ok(MessageHandle {
            channel,
            message: MessageId(parse_id(&message.id)?),
        })
    }

    async fn add_reaction(&self, message: &MessageHandle, emoji: &str) -> Result<(), PlatformError> {
        let path = format!(
            "/channels/{}/messages/{}/reactions/{}/@me",
            message.channel,
            message.message,
            encode_path_segment(emoji)
        );
        self.send(self.request(Method::PUT, &path)).await?;
        Ok(())
    }

    async fn fetch_reactions(&self, message: &MessageHandle) -> Result<Vec<ReactionEntry>, PlatformError> {
        let path = format!("/channels/{}/messages/{}", message.channel, message.message);
        let fetched: DiscordMessage = self.send_json(self.request(Method::GET, &path)).await?;

        let mut entries = Vec::new();
        for reaction in &fetched.reactions {
            let (display, key) = match (&reaction.emoji.name, &reaction.emoji.id) {
                (Some(name), Some(id)) => (name.clone(), format!("{}:{}", name, id)),
                (Some(name), None) => (name.clone(), name.clone()),
                _ => continue,
            };
            for user in self.reaction_users(message, &key).await? {
                // The REST listing carries no reaction time; the poll time stands in.
                let mut entry = ReactionEntry::new(UserId(parse_id(&user.id)?), display.clone());
                entry.is_bot = user.bot;
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn send_private(&self, user: UserId, notice: &Notice) -> Result<(), PlatformError> {
        let builder = self
            .request(Method::POST, "/users/@me/channels")
            .json(&json!({ "recipient_id": user.to_string() }));
        let channel: DiscordChannel = self.send_json(builder).await?;
        let channel = ChannelId(parse_id(&channel.id)?);
        match self.post_message(channel, notice).await {
            Ok(_) => Ok(()),
            Err(PlatformError::Forbidden(msg)) => Err(PlatformError::Refused(msg)),
            Err(e) => Err(e),
        }
    }

    async fn send_public(&self, channel: ChannelId, notice: &Notice) -> Result<MessageHandle, PlatformError> {
        self.send_announcement(channel, notice).await
    }

    async fn delete_message(&self, message: &MessageHandle) -> Result<(), PlatformError> {
        let path = format!("/channels/{}/messages/{}", message.channel, message.message);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }
}

#[async_trait]
impl Membership for DiscordClient {
    async fn resolve_member(&self, user: UserId) -> Result<Option<Member>, PlatformError> {
        let path = self.guild_path(&format!("/members/{}", user));
        match self
            .send_json::<DiscordMember>(self.request(Method::GET, &path))
            .await
        {
            Ok(member) => Ok(Some(convert_member(member)?)),
            Err(PlatformError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn grant_role(&self, member: &Member, role: RoleId, reason: &str) -> Result<(), PlatformError> {
        let path = self.guild_path(&format!("/members/{}/roles/{}", member.id, role));
        let builder = self
            .request(Method::PUT, &path)
            .header("X-Audit-Log-Reason", encode_path_segment(reason));
        self.send(builder).await?;
        Ok(())
    }

    async fn revoke_role(&self, member: &Member, role: RoleId, reason: &str) -> Result<RevokeOutcome, PlatformError> {
        if !member.has_role(role) {
            return Ok(RevokeOutcome::AlreadyAbsent);
        }
        let path = self.guild_path(&format!("/members/{}/roles/{}", member.id, role));
        let builder = self
            .request(Method::DELETE, &path)
            .header("X-Audit-Log-Reason", encode_path_segment(reason));
        self.send(builder).await?;
        Ok(RevokeOutcome::Revoked)
    }

    async fn find_role(&self, name: &str) -> Result<Option<RoleId>, PlatformError> {
        for role in self.list_roles().await? {
            if role.name == name {
                return Ok(Some(RoleId(parse_id(&role.id)?)));
            }
        }
        Ok(None)
    }

    async fn get_or_create_role(&self, name: &str) -> Result<RoleId, PlatformError> {
        if let Some(role) = self.find_role(name).await? {
            log::info!("Found existing role '{}'", name);
            return Ok(role);
        }
        log::warn!("Role '{}' not found, attempting to create it", name);
        let builder = self
            .request(Method::POST, &self.guild_path("/roles"))
            .json(&json!({ "name": name }));
        let role: DiscordRole = self.send_json(builder).await?;
        log::info!("Created role '{}'", name);
        Ok(RoleId(parse_id(&role.id)?))
    }

    async fn members_with_role(&self, role: RoleId) -> Result<Vec<Member>, PlatformError> {
        let mut holders = Vec::new();
        let mut after = 0u64;
        loop {
            let path = self.guild_path(&format!("/members?limit=1000&after={}", after));
            let page: Vec<DiscordMember> = self.send_json(self.request(Method::GET, &path)).await?;
            let count = page.len();
            for member in page {
                let member = convert_member(member)?;
                after = after.max(member.id.0);
                if member.has_role(role) {
                    holders.push(member);
                }
            }
            if count < 1000 {
                break;
            }
        }
        Ok(holders)
    }
}

fn parse_id(raw: &str) -> Result<u64, PlatformError> {
    raw.parse::<u64>().map_err(|_| PlatformError::Api {
        status: 0,
        message: format!("malformed snowflake '{}'", raw),
    })
}

fn convert_member(member: DiscordMember) -> Result<Member, PlatformError> {
    let roles = member
        .roles
        .iter()
        .map(|r| parse_id(r).map(RoleId))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Member {
        id: UserId(parse_id(&member.user.id)?),
        name: member.user.username,
        roles,
        is_bot: member.user.bot,
    })
}

/// Build the JSON body for a message create call
fn render_notice(notice: &Notice) -> Value {
    let mut body = json!({});
    if let Some(content) = &notice.content {
        body["content"] = json!(content);
    }
    if notice.has_card() {
        let mut embed = json!({
            "description": notice.description,
            "color": notice.tone.color(),
        });
        if let Some(title) = &notice.title {
            embed["title"] = json!(title);
        }
        if !notice.fields.is_empty() {
            embed["fields"] = json!(notice.fields);
        }
        if let Some(footer) = &notice.footer {
            embed["footer"] = json!({ "text": footer });
        }
        body["embeds"] = json!([embed]);
    }
    body
}

/// Percent-encode a string for use in a URL path segment or header
pub fn encode_path_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NoticeTone;

    #[test]
    fn test_encode_emoji() {
        assert_eq!(encode_path_segment("✅"), "%E2%9C%85");
        assert_eq!(encode_path_segment("party:123"), "party:123");
    }

    #[test]
    fn test_encode_reason_with_spaces() {
        assert_eq!(encode_path_segment("Task #3"), "Task%20%233");
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("1418471239504101487").unwrap(), 1418471239504101487);
        assert!(parse_id("abc").is_err());
    }

    #[test]
    fn test_render_text_only_notice() {
        let body = render_notice(&Notice::text("hello"));
        assert_eq!(body["content"], "hello");
        assert!(body.get("embeds").is_none());
    }

    #[test]
    fn test_render_card_notice() {
        let notice = Notice::card("Task Available!", "React to claim")
            .with_field("People Needed", "1", true)
            .with_footer("Task Bot")
            .with_tone(NoticeTone::Success);
        let body = render_notice(&notice);
        let embed = &body["embeds"][0];
        assert_eq!(embed["title"], "Task Available!");
        assert_eq!(embed["fields"][0]["name"], "People Needed");
        assert_eq!(embed["fields"][0]["inline"], true);
        assert_eq!(embed["footer"]["text"], "Task Bot");
        assert_eq!(embed["color"], NoticeTone::Success.color());
    }

    #[test]
    fn test_convert_member() {
        let member = DiscordMember {
            user: DiscordUser {
                id: "42".to_string(),
                username: "alice".to_string(),
                bot: false,
            },
            roles: vec!["7".to_string()],
        };
        let member = convert_member(member).unwrap();
        assert_eq!(member.id, UserId(42));
        assert!(member.has_role(RoleId(7)));
    }

    #[test]
    fn test_from_env_requires_token() {
        let result = DiscordClient::from_env("TASKBOT_TEST_UNSET_TOKEN", DiscordConfig::default());
        assert!(matches!(result, Err(PlatformError::NotConfigured(_))));
    }
}
