//! Identity verification against an external reputation source
//!
//! A member claims an external account; if the account is not blocked and
//! has enough reputation the member gets the verified role.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::allocation::{OpsLog, SharedController};
use crate::config::VerificationSection;
use crate::platform::{Collaborators, Member, Membership, Messaging, Notice, PlatformError, ReputationSource, UserId};

/// Why a verification was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Blocked,
    EmptyUsername,
    MemberNotFound,
    LookupFailed(String),
    Insufficient { minimum: i64, total: i64 },
    /// The role grant itself failed
    GrantFailed(String),
}

impl Rejection {
    pub fn shortfall(&self) -> Option<i64> {
        match self {
            Rejection::Insufficient { minimum, total } => Some(minimum - total),
            _ => None,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Blocked => write!(f, "This Reddit account is not eligible for verification."),
            Rejection::EmptyUsername => write!(f, "Please provide a valid Reddit username."),
            Rejection::MemberNotFound => write!(f, "Could not find you in this server."),
            Rejection::LookupFailed(message) => write!(f, "Could not verify Reddit account: {}", message),
            Rejection::Insufficient { minimum, total } => write!(
                f,
                "Your Reddit account does not meet the minimum requirement of {} karma. Your total karma is {} ({} short).",
                minimum,
                total,
                minimum - total
            ),
            Rejection::GrantFailed(message) => {
                write!(f, "An unexpected error occurred during the final verification step: {}", message)
            }
        }
    }
}

/// A successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub member: Member,
    pub username: String,
    pub total: i64,
}

/// Strip `u/` and `/u/` prefixes and surrounding whitespace
pub fn normalize_username(raw: &str) -> String {
    raw.replace("/u/", "").replace("u/", "").trim().to_string()
}

/// 1234567 -> "1,234,567"
pub fn format_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0 { format!("-{}", out) } else { out }
}

pub struct IdentityVerifier {
    membership: Arc<dyn Membership>,
    messaging: Arc<dyn Messaging>,
    reputation: Arc<dyn ReputationSource>,
    controller: SharedController,
    ops: OpsLog,
    role_name: String,
    minimum: i64,
    blocked: HashSet<String>,
}

impl IdentityVerifier {
    pub fn new(
        collaborators: &Collaborators,
        controller: SharedController,
        ops: OpsLog,
        section: &VerificationSection,
    ) -> Self {
        Self {
            membership: collaborators.membership.clone(),
            messaging: collaborators.messaging.clone(),
            reputation: collaborators.reputation.clone(),
            controller,
            ops,
            role_name: section.verified_role_name.clone(),
            minimum: section.minimum_karma,
            blocked: section.blocked_ids.iter().map(|id| id.to_lowercase()).collect(),
        }
    }

    pub async fn verify(&self, user: UserId, raw_username: &str) -> Result<Verified, Rejection> {
        let username = normalize_username(raw_username);
        log::info!("Verification requested by {} for Reddit user '{}'", user, username);

        if self.blocked.contains(&username.to_lowercase()) {
            log::warn!("User {} attempted to verify a blocked Reddit ID: '{}'.", user, username);
            return Err(Rejection::Blocked);
        }
        if username.is_empty() {
            return Err(Rejection::EmptyUsername);
        }

        let member = match self.membership.resolve_member(user).await {
            Ok(Some(member)) => member,
            Ok(None) => return Err(Rejection::MemberNotFound),
            Err(e) => {
                log::error!("Error fetching member {}: {}", user, e);
                return Err(Rejection::MemberNotFound);
            }
        };

        let reputation = match self.reputation.lookup_reputation(&username).await {
            Ok(reputation) => reputation,
            Err(PlatformError::NotConfigured(message)) => {
                log::warn!("Reddit API credentials are not configured.");
                return Err(Rejection::LookupFailed(message));
            }
            Err(e) => {
                log::error!("Error fetching karma for u/{}: {}", username, e);
                return Err(Rejection::LookupFailed(e.to_string()));
            }
        };
        let total = reputation.total();
        if total < self.minimum {
            log::info!("u/{} has {} karma; {} required", username, total, self.minimum);
            return Err(Rejection::Insufficient {
                minimum: self.minimum,
                total,
            });
        }

        let reason = format!("Reddit verification: u/{}", username);
        let granted = match self.membership.get_or_create_role(&self.role_name).await {
            Ok(role) => self.membership.grant_role(&member, role, &reason).await,
            Err(e) => Err(e),
        };
        if let Err(e) = granted {
            log::error!("Error during verification process for {}: {}", member.name, e);
            return Err(Rejection::GrantFailed(e.to_string()));
        }

        self.post_summary(&member, &username, total).await;
        self.ops
            .post(format!(
                "✅ Reddit verification successful: {} verified as u/{} with {} karma.",
                member.mention(),
                username,
                format_thousands(total)
            ))
            .await;

        Ok(Verified { member, username, total })
    }

    async fn post_summary(&self, member: &Member, username: &str, total: i64) {
        let Some(channel) = self.controller.settings().verification_channel else {
            log::warn!("Verification channel not configured, skipping verification log.");
            return;
        };
        let summary = Notice::text(format!(
            "**Discord:** {} (`{}`) \n**Reddit:** [u/{}](https://www.reddit.com/user/{}/) \n**Total Karma:** {}\n",
            member.mention(),
            member.name,
            username,
            username,
            format_thousands(total)
        ));
        match self.messaging.send_public(channel, &summary).await {
            Ok(_) => log::info!("Sent verification log to channel {}", channel),
            Err(e) => {
                log::error!("Failed to send verification log: {}", e);
                self.ops
                    .post(format!(
                        "⚠️ **Could not send log to Verification Channel ({})**\n\n**Error:** ```{}```\n**Most Likely Cause:** The bot is missing the **`Embed Links`** permission in that channel.",
                        channel.mention(),
                        e
                    ))
                    .await;
            }
        }
    }
}
