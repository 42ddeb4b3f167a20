//! RoleLifecycleManager - cooldown role grants and their deferred revocation
//!
//! Revocations run as detached tokio tasks. The manager keeps a map of the
//! ones still pending so status can report them; each task removes its own
//! entry when it finishes, however it finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::notify::OpsLog;
use crate::error::TaskbotError;
use crate::platform::{Member, Membership, PlatformError, RevokeOutcome, RoleId, UserId};

/// A granted cooldown role and when it should go away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub member_id: UserId,
    pub member_name: String,
    pub role_id: RoleId,
    pub role_name: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RoleGrant {
    pub fn delay(&self) -> Duration {
        (self.expires_at - self.granted_at).to_std().unwrap_or_default()
    }
}

/// How a revocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationOutcome {
    Revoked,
    AlreadyAbsent,
    /// The member left the guild
    MemberGone,
    Failed(String),
}

type PendingMap = Arc<Mutex<HashMap<u64, RoleGrant>>>;

/// Removes its entry from the pending map when the revocation task ends or is aborted
struct PendingEntry {
    pending: PendingMap,
    key: u64,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.key);
    }
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, RoleGrant>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RoleLifecycleManager {
    membership: Arc<dyn Membership>,
    ops: OpsLog,
    pending: PendingMap,
    next_key: AtomicU64,
}

impl RoleLifecycleManager {
    pub fn new(membership: Arc<dyn Membership>, ops: OpsLog) -> Self {
        Self {
            membership,
            ops,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_key: AtomicU64::new(1),
        }
    }

    /// Grant `role` to `member`; the grant expires after `removal_delay`
    pub async fn grant(
        &self,
        member: &Member,
        role: RoleId,
        role_name: &str,
        removal_delay: Duration,
        reason: &str,
    ) -> Result<RoleGrant, TaskbotError> {
        self.membership
            .grant_role(member, role, reason)
            .await
            .map_err(TaskbotError::from)?;
        let granted_at = Utc::now();
        let expires_at = granted_at + chrono::Duration::from_std(removal_delay).unwrap_or(chrono::Duration::zero());
        log::info!("Granted '{}' to {}", role_name, member.name);
        Ok(RoleGrant {
            member_id: member.id,
            member_name: member.name.clone(),
            role_id: role,
            role_name: role_name.to_string(),
            granted_at,
            expires_at,
        })
    }

    /// Spawn the deferred revocation for a grant and return immediately
    pub fn schedule_revocation(&self, grant: RoleGrant) -> JoinHandle<RevocationOutcome> {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        lock(&self.pending).insert(key, grant.clone());
        let entry = PendingEntry {
            pending: self.pending.clone(),
            key,
        };

        let membership = self.membership.clone();
        let ops = self.ops.clone();
        let delay = grant.delay();
        log::info!(
            "Scheduling role '{}' removal for {} in {} hours.",
            grant.role_name,
            grant.member_name,
            delay.as_secs() / 3600
        );

        tokio::spawn(async move {
            let _entry = entry;
            tokio::time::sleep(delay).await;
            revoke_after_delay(membership.as_ref(), &ops, &grant).await
        })
    }

    /// Revocations not yet finished
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn pending(&self) -> Vec<RoleGrant> {
        let mut grants: Vec<RoleGrant> = lock(&self.pending).values().cloned().collect();
        grants.sort_by_key(|g| g.expires_at);
        grants
    }

    /// Revoke immediately if the member still holds the role
    pub async fn revoke_now(&self, member: &Member, role: RoleId, reason: &str) -> RevocationOutcome {
        if !member.has_role(role) {
            return RevocationOutcome::AlreadyAbsent;
        }
        match self.membership.revoke_role(member, role, reason).await {
            Ok(RevokeOutcome::Revoked) => RevocationOutcome::Revoked,
            Ok(RevokeOutcome::AlreadyAbsent) => RevocationOutcome::AlreadyAbsent,
            Err(PlatformError::NotFound(_)) => RevocationOutcome::MemberGone,
            Err(e) => RevocationOutcome::Failed(e.to_string()),
        }
    }
}

async fn revoke_after_delay(membership: &dyn Membership, ops: &OpsLog, grant: &RoleGrant) -> RevocationOutcome {
    let hours = grant.delay().as_secs() / 3600;
    log::info!(
        "Attempting to remove role '{}' from {} now.",
        grant.role_name,
        grant.member_name
    );

    // Re-resolve: the member may have left and rejoined since the grant.
    let member = match membership.resolve_member(grant.member_id).await {
        Ok(Some(member)) => member,
        Ok(None) | Err(PlatformError::NotFound(_)) => {
            log::warn!(
                "Could not remove role from {} as they have left the server.",
                grant.member_name
            );
            return RevocationOutcome::MemberGone;
        }
        Err(e) => {
            log::error!("Failed to remove role from {}: {}", grant.member_name, e);
            return RevocationOutcome::Failed(e.to_string());
        }
    };

    if !member.has_role(grant.role_id) {
        log::warn!("Role '{}' was already removed from {}.", grant.role_name, member.name);
        return RevocationOutcome::AlreadyAbsent;
    }

    let reason = format!("TaskBot: Timed {}-hour removal", hours);
    match membership.revoke_role(&member, grant.role_id, &reason).await {
        Ok(RevokeOutcome::Revoked) => {
            log::info!("Removed '{}' from {}.", grant.role_name, member.name);
            ops.post(format!(
                "Role '{}' removed from {} after {} hours.",
                grant.role_name,
                member.mention(),
                hours
            ))
            .await;
            RevocationOutcome::Revoked
        }
        Ok(RevokeOutcome::AlreadyAbsent) => {
            log::warn!("Role '{}' was already removed from {}.", grant.role_name, member.name);
            RevocationOutcome::AlreadyAbsent
        }
        Err(PlatformError::NotFound(_)) => {
            log::warn!(
                "Could not remove role from {} as they have left the server.",
                member.name
            );
            RevocationOutcome::MemberGone
        }
        Err(e) => {
            log::error!("Failed to remove role from {}: {}", member.name, e);
            RevocationOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::controller::{AllocationController, Settings, SharedController};
    use crate::platform::{ChannelId, MockPlatform};

    const LOGS: ChannelId = ChannelId(200);
    const SIX_HOURS: Duration = Duration::from_secs(6 * 3600);

    fn setup() -> (Arc<MockPlatform>, RoleLifecycleManager) {
        let mock = Arc::new(MockPlatform::new());
        let controller = SharedController::new(AllocationController::new(Settings {
            announce_channel: Some(ChannelId(100)),
            logs_channel: Some(LOGS),
            ..Default::default()
        }));
        let ops = OpsLog::new(mock.clone(), controller);
        let manager = RoleLifecycleManager::new(mock.clone(), ops);
        (mock, manager)
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_then_revoke_after_delay() {
        let (mock, manager) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        let role = mock.add_role("TaskHolder");

        let grant = manager
            .grant(&member, role, "TaskHolder", SIX_HOURS, "test")
            .await
            .unwrap();
        assert_eq!(grant.delay(), SIX_HOURS);
        assert!(mock.member(UserId(10)).unwrap().has_role(role));

        let handle = manager.schedule_revocation(grant);
        assert_eq!(manager.in_flight(), 1);

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, RevocationOutcome::Revoked);
        assert!(!mock.member(UserId(10)).unwrap().has_role(role));
        assert_eq!(manager.in_flight(), 0);
        assert!(mock.public_text(LOGS)[0].contains("removed from <@10> after 6 hours"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revocation_when_member_left() {
        let (mock, manager) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        let role = mock.add_role("TaskHolder");

        let grant = manager.grant(&member, role, "TaskHolder", SIX_HOURS, "test").await.unwrap();
        let handle = manager.schedule_revocation(grant);
        mock.remove_member(UserId(10));

        assert_eq!(handle.await.unwrap(), RevocationOutcome::MemberGone);
        assert_eq!(manager.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revocation_when_role_already_removed() {
        let (mock, manager) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        let role = mock.add_role("TaskHolder");

        let grant = manager.grant(&member, role, "TaskHolder", SIX_HOURS, "test").await.unwrap();
        let handle = manager.schedule_revocation(grant);
        mock.revoke_role(&member, role, "manual").await.unwrap();

        assert_eq!(handle.await.unwrap(), RevocationOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_forbidden_grant_is_permission_error() {
        let (mock, manager) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        mock.forbid_grant(UserId(10));
        let role = mock.add_role("TaskHolder");

        let err = manager
            .grant(&member, role, "TaskHolder", SIX_HOURS, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbotError::Permission(_)));
    }

    #[tokio::test]
    async fn test_aborted_revocation_untracks() {
        let (mock, manager) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        let role = mock.add_role("TaskHolder");

        let grant = manager.grant(&member, role, "TaskHolder", SIX_HOURS, "test").await.unwrap();
        let handle = manager.schedule_revocation(grant);
        assert_eq!(manager.pending().len(), 1);
        handle.abort();
        let _ = handle.await;
        assert_eq!(manager.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_revoke_now_skips_absent_role() {
        let (mock, manager) = setup();
        let role = mock.add_role("TaskHolder");
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        assert_eq!(
            manager.revoke_now(&member, role, "sweep").await,
            RevocationOutcome::AlreadyAbsent
        );
    }
}
