//! In-memory platform for tests
//!
//! MockPlatform implements every capability trait against local state and
//! lets a test script reactions, refusals and failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::sheets::extract_sheet_id;
use super::{
    ChannelId, LedgerStore, Member, MessageHandle, MessageId, Messaging, Membership, Notice, PlatformError, ReactionEntry,
    Reputation, ReputationSource, RevokeOutcome, RoleId, SheetHandle, UserId,
};

/// User id the mock reports for its own reactions
pub const MOCK_BOT_USER: UserId = UserId(1);

struct PostedMessage {
    channel: ChannelId,
    posted_at: Instant,
    posted_wall: DateTime<Utc>,
    /// Reactions and the delay after posting at which they become visible
    reactions: Vec<(ReactionEntry, Duration)>,
}

#[derive(Default)]
struct MockState {
    next_message_id: u64,
    next_role_id: u64,
    messages: HashMap<MessageId, PostedMessage>,
    queued_reactions: Vec<(ReactionEntry, Duration)>,
    announcements: Vec<(ChannelId, Notice)>,
    public_messages: Vec<(ChannelId, Notice)>,
    deleted_messages: Vec<MessageId>,
    untimed_reactions: bool,
    private_messages: Vec<(UserId, Notice)>,

    members: HashMap<UserId, Member>,
    roles: HashMap<String, RoleId>,
    revocations: Vec<(UserId, RoleId)>,

    refuse_private: HashSet<UserId>,
    forbid_grant: HashSet<UserId>,
    fail_member_fetch: HashSet<UserId>,
    member_fetch_delay: HashMap<UserId, Duration>,
    fail_announcements: bool,
    fail_reaction_fetch: bool,
    fail_public: bool,

    sheet_rows: u32,
    ledger_failures: u32,
    ledger_attempts: u32,
    ledger_cells: Vec<(u32, u32, String)>,

    reputations: HashMap<String, Reputation>,
    reputation_error: Option<String>,
}

/// Scriptable in-memory implementation of all platform capabilities
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_message_id: 1000,
                next_role_id: 500,
                sheet_rows: 1000,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    //=== Scripting ===

    /// Add a guild member
    pub fn add_member(&self, member: Member) {
        self.state().members.insert(member.id, member);
    }

    /// Remove a member, as if they left the guild
    pub fn remove_member(&self, user: UserId) {
        self.state().members.remove(&user);
    }

    /// Ensure a role exists and return its id
    pub fn add_role(&self, name: &str) -> RoleId {
        let mut state = self.state();
        if let Some(id) = state.roles.get(name) {
            return *id;
        }
        state.next_role_id += 1;
        let id = RoleId(state.next_role_id);
        state.roles.insert(name.to_string(), id);
        id
    }

    /// Attach a reaction to the next announcement, visible `after` it is posted
    pub fn queue_reaction(&self, user: UserId, emoji: &str, after: Duration) {
        self.state()
            .queued_reactions
            .push((ReactionEntry::new(user, emoji), after));
    }

    /// Attach a bot reaction to the next announcement
    pub fn queue_bot_reaction(&self, user: UserId, emoji: &str, after: Duration) {
        self.state()
            .queued_reactions
            .push((ReactionEntry::bot(user, emoji), after));
    }

    /// Report reactions without their time, like a REST listing
    pub fn omit_reaction_times(&self, omit: bool) {
        self.state().untimed_reactions = omit;
    }

    pub fn refuse_private(&self, user: UserId) {
        self.state().refuse_private.insert(user);
    }

    pub fn forbid_grant(&self, user: UserId) {
        self.state().forbid_grant.insert(user);
    }

    pub fn fail_member_fetch(&self, user: UserId) {
        self.state().fail_member_fetch.insert(user);
    }

    pub fn delay_member_fetch(&self, user: UserId, delay: Duration) {
        self.state().member_fetch_delay.insert(user, delay);
    }

    pub fn fail_announcements(&self, fail: bool) {
        self.state().fail_announcements = fail;
    }

    pub fn fail_reaction_fetch(&self, fail: bool) {
        self.state().fail_reaction_fetch = fail;
    }

    pub fn fail_public(&self, fail: bool) {
        self.state().fail_public = fail;
    }

    /// Fail the next `count` ledger writes with a transient error
    pub fn fail_ledger_writes(&self, count: u32) {
        self.state().ledger_failures = count;
    }

    pub fn set_sheet_rows(&self, rows: u32) {
        self.state().sheet_rows = rows;
    }

    pub fn set_reputation(&self, username: &str, reputation: Reputation) {
        self.state()
            .reputations
            .insert(username.to_lowercase(), reputation);
    }

    pub fn fail_reputation(&self, message: &str) {
        self.state().reputation_error = Some(message.to_string());
    }

    //=== Inspection ===

    pub fn announcements(&self) -> Vec<Notice> {
        self.state()
            .announcements
            .iter()
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn public_messages(&self) -> Vec<(ChannelId, Notice)> {
        self.state().public_messages.clone()
    }

    /// Flattened text of every public message posted to a channel
    pub fn public_text(&self, channel: ChannelId) -> Vec<String> {
        self.state()
            .public_messages
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, n)| n.plain_text())
            .collect()
    }

    pub fn deleted_messages(&self) -> Vec<MessageId> {
        self.state().deleted_messages.clone()
    }

    pub fn private_messages(&self) -> Vec<(UserId, Notice)> {
        self.state().private_messages.clone()
    }

    pub fn ledger_cells(&self) -> Vec<(u32, u32, String)> {
        self.state().ledger_cells.clone()
    }

    pub fn ledger_attempts(&self) -> u32 {
        self.state().ledger_attempts
    }

    pub fn member(&self, user: UserId) -> Option<Member> {
        self.state().members.get(&user).cloned()
    }

    pub fn role_id(&self, name: &str) -> Option<RoleId> {
        self.state().roles.get(name).copied()
    }

    pub fn revocations(&self) -> Vec<(UserId, RoleId)> {
        self.state().revocations.clone()
    }
}

#[async_trait]
impl Messaging for MockPlatform {
    async fn send_announcement(&self, channel: ChannelId, notice: &Notice) -> Result<MessageHandle, PlatformError> {
        let mut state = self.state();
        if state.fail_announcements {
            return Err(PlatformError::Transient("announcement rejected".to_string()));
        }
        state.next_message_id += 1;
        let id = MessageId(state.next_message_id);
        let reactions = std::mem::take(&mut state.queued_reactions);
        state.messages.insert(
            id,
            PostedMessage {
                channel,
                posted_at: Instant::now(),
                posted_wall: Utc::now(),
                reactions,
            },
        );
        state.announcements.push((channel, notice.clone()));
        Ok(MessageHandle { channel, message: id })
    }

    async fn add_reaction(&self, message: &MessageHandle, emoji: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        let posted = state
            .messages
            .get_mut(&message.message)
            .ok_or_else(|| PlatformError::NotFound(format!("message {}", message.message)))?;
        posted
            .reactions
            .push((ReactionEntry::bot(MOCK_BOT_USER, emoji), Duration::ZERO));
        Ok(())
    }

    async fn fetch_reactions(&self, message: &MessageHandle) -> Result<Vec<ReactionEntry>, PlatformError> {
        let state = self.state();
        if state.fail_reaction_fetch {
            return Err(PlatformError::Transient("reaction fetch failed".to_string()));
        }
        let posted = state
            .messages
            .get(&message.message)
            .ok_or_else(|| PlatformError::NotFound(format!("message {}", message.message)))?;
        let elapsed = posted.posted_at.elapsed();
        let timed = !state.untimed_reactions;
        Ok(posted
            .reactions
            .iter()
            .filter(|(_, after)| *after <= elapsed)
            .map(|(entry, after)| match chrono::Duration::from_std(*after) {
                Ok(offset) if timed => entry.clone().at(posted.posted_wall + offset),
                _ => entry.clone(),
            })
            .collect())
    }

    async fn send_private(&self, user: UserId, notice: &Notice) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.refuse_private.contains(&user) {
            return Err(PlatformError::Refused(format!("user {} does not accept DMs", user)));
        }
        state.private_messages.push((user, notice.clone()));
        Ok(())
    }

    async fn send_public(&self, channel: ChannelId, notice: &Notice) -> Result<MessageHandle, PlatformError> {
        let mut state = self.state();
        if state.fail_public {
            return Err(PlatformError::Transient("send failed".to_string()));
        }
        state.next_message_id += 1;
        let id = MessageId(state.next_message_id);
        state.messages.insert(
            id,
            PostedMessage {
                channel,
                posted_at: Instant::now(),
                posted_wall: Utc::now(),
                reactions: Vec::new(),
            },
        );
        state.public_messages.push((channel, notice.clone()));
        Ok(MessageHandle { channel, message: id })
    }

    async fn delete_message(&self, message: &MessageHandle) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.messages.remove(&message.message).is_none() {
            return Err(PlatformError::NotFound(format!("message {}", message.message)));
        }
        state.deleted_messages.push(message.message);
        Ok(())
    }
}

#[async_trait]
impl Membership for MockPlatform {
    async fn resolve_member(&self, user: UserId) -> Result<Option<Member>, PlatformError> {
        let delay = {
            let state = self.state();
            if state.fail_member_fetch.contains(&user) {
                return Err(PlatformError::Transient(format!("fetch of member {} failed", user)));
            }
            state.member_fetch_delay.get(&user).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().members.get(&user).cloned())
    }

    async fn grant_role(&self, member: &Member, role: RoleId, _reason: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.forbid_grant.contains(&member.id) {
            return Err(PlatformError::Forbidden("Missing Permissions".to_string()));
        }
        let stored = state
            .members
            .get_mut(&member.id)
            .ok_or_else(|| PlatformError::NotFound(format!("member {}", member.id)))?;
        if !stored.has_role(role) {
            stored.roles.push(role);
        }
        Ok(())
    }

    async fn revoke_role(&self, member: &Member, role: RoleId, _reason: &str) -> Result<RevokeOutcome, PlatformError> {
        let mut state = self.state();
        let stored = state
            .members
            .get_mut(&member.id)
            .ok_or_else(|| PlatformError::NotFound(format!("member {}", member.id)))?;
        if !stored.has_role(role) {
            return Ok(RevokeOutcome::AlreadyAbsent);
        }
        stored.roles.retain(|r| *r != role);
        state.revocations.push((member.id, role));
        Ok(RevokeOutcome::Revoked)
    }

    async fn find_role(&self, name: &str) -> Result<Option<RoleId>, PlatformError> {
        Ok(self.state().roles.get(name).copied())
    }

    async fn get_or_create_role(&self, name: &str) -> Result<RoleId, PlatformError> {
        Ok(self.add_role(name))
    }

    async fn members_with_role(&self, role: RoleId) -> Result<Vec<Member>, PlatformError> {
        let mut members: Vec<Member> = self
            .state()
            .members
            .values()
            .filter(|m| m.has_role(role))
            .cloned()
            .collect();
        members.sort_by_key(|m| m.id);
        Ok(members)
    }
}

#[async_trait]
impl LedgerStore for MockPlatform {
    async fn open_sheet(&self, url: &str) -> Result<SheetHandle, PlatformError> {
        let sheet_id = extract_sheet_id(url).ok_or_else(|| PlatformError::InvalidUrl(url.to_string()))?;
        Ok(SheetHandle {
            sheet_id,
            worksheet: "Sheet1".to_string(),
            row_count: self.state().sheet_rows,
        })
    }

    async fn write_cell(&self, sheet: &SheetHandle, row: u32, col: u32, value: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.ledger_attempts += 1;
        if state.ledger_failures > 0 {
            state.ledger_failures -= 1;
            return Err(PlatformError::Transient("sheets API unavailable".to_string()));
        }
        if row > sheet.row_count {
            return Err(PlatformError::OutOfBounds {
                row,
                rows: sheet.row_count,
            });
        }
        state.ledger_cells.push((row, col, value.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ReputationSource for MockPlatform {
    async fn lookup_reputation(&self, username: &str) -> Result<Reputation, PlatformError> {
        let state = self.state();
        if let Some(message) = &state.reputation_error {
            return Err(PlatformError::Transient(message.clone()));
        }
        state
            .reputations
            .get(&username.to_lowercase())
            .copied()
            .ok_or_else(|| PlatformError::NotFound(format!("u/{}", username)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/abc123/edit";

    #[tokio::test(start_paused = true)]
    async fn test_reactions_become_visible_after_offset() {
        let mock = MockPlatform::new();
        mock.queue_reaction(UserId(10), "✅", Duration::from_secs(3));

        let handle = mock
            .send_announcement(ChannelId(1), &Notice::text("task"))
            .await
            .unwrap();
        assert!(mock.fetch_reactions(&handle).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let reactions = mock.fetch_reactions(&handle).await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].user, UserId(10));
        assert!(reactions[0].reacted_at.is_some());

        mock.omit_reaction_times(true);
        assert_eq!(
            mock.fetch_reactions(&handle).await.unwrap(),
            vec![ReactionEntry::new(UserId(10), "✅")]
        );
    }

    #[tokio::test]
    async fn test_grant_and_revoke_role() {
        let mock = MockPlatform::new();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        let role = mock.add_role("TaskHolder");

        mock.grant_role(&member, role, "test").await.unwrap();
        assert!(mock.member(UserId(10)).unwrap().has_role(role));

        let outcome = mock.revoke_role(&member, role, "test").await.unwrap();
        assert_eq!(outcome, RevokeOutcome::Revoked);
        let outcome = mock.revoke_role(&member, role, "test").await.unwrap();
        assert_eq!(outcome, RevokeOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_refused_private_message() {
        let mock = MockPlatform::new();
        mock.refuse_private(UserId(10));
        let result = mock.send_private(UserId(10), &Notice::text("hi")).await;
        assert!(matches!(result, Err(PlatformError::Refused(_))));
    }

    #[tokio::test]
    async fn test_ledger_failures_then_success() {
        let mock = MockPlatform::new();
        mock.fail_ledger_writes(1);
        let sheet = mock.open_sheet(SHEET_URL).await.unwrap();
        assert!(mock.write_cell(&sheet, 2, 4, "alice").await.is_err());
        mock.write_cell(&sheet, 2, 4, "alice").await.unwrap();
        assert_eq!(mock.ledger_attempts(), 2);
        assert_eq!(mock.ledger_cells(), vec![(2, 4, "alice".to_string())]);
    }

    #[tokio::test]
    async fn test_open_sheet_rejects_bad_url() {
        let mock = MockPlatform::new();
        let result = mock.open_sheet("https://example.com/nothing").await;
        assert!(matches!(result, Err(PlatformError::InvalidUrl(_))));
    }
}
