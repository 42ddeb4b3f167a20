//! Startup Recovery - removes cooldown roles left over from a previous run
//!
//! Deferred revocations live only in memory, so a restart loses them. On
//! start the service sweeps every member still holding the cooldown role and
//! revokes it. Running the sweep twice is harmless.

use std::sync::Arc;
use std::time::Duration;

use crate::allocation::{RevocationOutcome, RoleLifecycleManager};
use crate::error::Result;
use crate::platform::{Membership, UserId};

/// What the sweep did for one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    Revoked { member: UserId },
    /// Already gone by the time we got there
    Skipped { member: UserId },
    Failed { member: UserId, error: String },
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub role_name: String,
    /// Pause between revocations, to stay under platform rate limits
    pub pause: Duration,
}

pub struct Recovery {
    membership: Arc<dyn Membership>,
    roles: Arc<RoleLifecycleManager>,
    config: RecoveryConfig,
}

impl Recovery {
    pub fn new(membership: Arc<dyn Membership>, roles: Arc<RoleLifecycleManager>, config: RecoveryConfig) -> Self {
        Self {
            membership,
            roles,
            config,
        }
    }

    /// Revoke the cooldown role from everyone still holding it.
    ///
    /// Errors only if the role or member list cannot be read; individual
    /// revocation failures are reported and the sweep continues.
    pub async fn recover_all(&self) -> Result<Vec<RecoveryAction>> {
        log::info!("Performing startup cleanup of lingering task roles...");
        let Some(role) = self.membership.find_role(&self.config.role_name).await? else {
            log::info!("Role '{}' does not exist yet; nothing to clean up.", self.config.role_name);
            return Ok(Vec::new());
        };

        let holders = self.membership.members_with_role(role).await?;
        if holders.is_empty() {
            log::info!("No lingering task roles found.");
            return Ok(Vec::new());
        }
        log::info!("Found {} members with lingering task roles.", holders.len());

        let mut actions = Vec::with_capacity(holders.len());
        for (i, member) in holders.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.pause).await;
            }
            let action = match self.roles.revoke_now(member, role, "Bot startup cleanup").await {
                RevocationOutcome::Revoked => {
                    log::info!("Removed lingering '{}' from {}", self.config.role_name, member.name);
                    RecoveryAction::Revoked { member: member.id }
                }
                RevocationOutcome::AlreadyAbsent | RevocationOutcome::MemberGone => {
                    RecoveryAction::Skipped { member: member.id }
                }
                RevocationOutcome::Failed(error) => {
                    log::error!("Failed to remove role from {} during cleanup: {}", member.name, error);
                    RecoveryAction::Failed {
                        member: member.id,
                        error,
                    }
                }
            };
            actions.push(action);
        }
        log::info!("Startup role cleanup complete.");
        Ok(actions)
    }
}
