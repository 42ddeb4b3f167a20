//! EligibilityResolver - turn raw reactions into eligible candidates

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::platform::{Member, Membership, ReactionEntry, RoleId, UserId};

/// A reactor who resolved to a guild member and passed the filters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub member: Member,
    pub first_seen: Option<DateTime<Utc>>,
}

pub struct EligibilityResolver {
    membership: Arc<dyn Membership>,
    fetch_timeout: Duration,
}

impl EligibilityResolver {
    pub fn new(membership: Arc<dyn Membership>, fetch_timeout: Duration) -> Self {
        Self {
            membership,
            fetch_timeout,
        }
    }

    /// Resolve the reactions on an announcement into candidates.
    ///
    /// Only the selection emoji counts. Each user appears once, in the order
    /// they first appear in `reactions`. Bots and holders of `cooldown_role`
    /// are dropped, as is anyone whose member lookup fails or times out.
    pub async fn resolve(
        &self,
        reactions: &[ReactionEntry],
        first_seen: &HashMap<UserId, DateTime<Utc>>,
        selection_emoji: &str,
        cooldown_role: Option<RoleId>,
    ) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut reactors = Vec::new();
        for entry in reactions {
            if entry.is_bot || entry.emoji != selection_emoji {
                continue;
            }
            if seen.insert(entry.user) {
                reactors.push(entry.user);
            }
        }

        let mut members = Vec::new();
        for user in reactors {
            if let Some(member) = self.fetch_member(user).await
                && !member.is_bot
            {
                members.push(member);
            }
        }
        log::info!("Found {} unique non-bot reactors.", members.len());

        let candidates: Vec<Candidate> = members
            .into_iter()
            .filter(|member| cooldown_role.is_none_or(|role| !member.has_role(role)))
            .map(|member| Candidate {
                first_seen: first_seen.get(&member.id).copied(),
                member,
            })
            .collect();
        log::info!("{} eligible reactors after filtering for cooldowns.", candidates.len());
        candidates
    }

    async fn fetch_member(&self, user: UserId) -> Option<Member> {
        match tokio::time::timeout(self.fetch_timeout, self.membership.resolve_member(user)).await {
            Ok(Ok(Some(member))) => Some(member),
            Ok(Ok(None)) => {
                log::error!("User {} not found in guild", user);
                None
            }
            Ok(Err(e)) => {
                log::error!("Failed to fetch member {}: {}", user, e);
                None
            }
            Err(_) => {
                log::error!("Timed out fetching member {} after {:?}", user, self.fetch_timeout);
                None
            }
        }
    }
}
