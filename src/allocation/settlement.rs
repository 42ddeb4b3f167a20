//! Settlement - the per-winner pipeline: role, revocation, notice, ledger
//!
//! Each settlement is an independent unit. A failure is returned as a value
//! so the caller can keep going with the next winner.

use std::sync::Arc;

use super::controller::Settings;
use super::ledger::{LedgerOutcome, LedgerWriter};
use super::notify::{Delivery, NotificationDispatcher, OpsLog, assignment_notice};
use super::roles::{RoleGrant, RoleLifecycleManager};
use crate::error::TaskbotError;
use crate::platform::{Collaborators, Member, Membership};

/// A winner who got their role; notice and ledger are best-effort
#[derive(Debug, Clone)]
pub struct Settlement {
    pub task_number: u32,
    pub member: Member,
    pub grant: RoleGrant,
    pub delivery: Delivery,
    pub ledger: LedgerOutcome,
}

#[derive(Debug)]
pub struct SettlementFailure {
    pub task_number: u32,
    pub member: Member,
    pub error: TaskbotError,
}

pub struct Settler {
    membership: Arc<dyn Membership>,
    roles: Arc<RoleLifecycleManager>,
    notifier: NotificationDispatcher,
    ledger: LedgerWriter,
    ops: OpsLog,
}

impl Settler {
    pub fn new(collaborators: &Collaborators, roles: Arc<RoleLifecycleManager>, ops: OpsLog) -> Self {
        Self {
            membership: collaborators.membership.clone(),
            roles,
            notifier: NotificationDispatcher::new(collaborators.messaging.clone()),
            ledger: LedgerWriter::new(collaborators.ledger.clone()),
            ops,
        }
    }

    pub fn with_ledger(mut self, ledger: LedgerWriter) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn roles(&self) -> &Arc<RoleLifecycleManager> {
        &self.roles
    }

    /// Run the pipeline for one member and task number
    pub async fn settle(
        &self,
        member: &Member,
        task_number: u32,
        settings: &Settings,
        reason: &str,
    ) -> Result<Settlement, SettlementFailure> {
        let fail = |error: TaskbotError| SettlementFailure {
            task_number,
            member: member.clone(),
            error,
        };

        let role = self
            .membership
            .get_or_create_role(&settings.task_role_name)
            .await
            .map_err(|e| fail(e.into()))?;

        let grant = match self
            .roles
            .grant(member, role, &settings.task_role_name, settings.role_removal, reason)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                if matches!(e, TaskbotError::Permission(_)) {
                    log::error!("Bot lacks permissions to assign Task #{} to {}.", task_number, member.name);
                    self.ops
                        .post(format!(
                            "❌ **Permission Error!** Could not assign Task #{} to {}. The bot needs 'Manage Roles' and its role must be higher than '{}'.",
                            task_number,
                            member.mention(),
                            settings.task_role_name
                        ))
                        .await;
                }
                return Err(fail(e));
            }
        };

        // Detached; the manager tracks it until it finishes.
        drop(self.roles.schedule_revocation(grant.clone()));

        let notice = assignment_notice(
            task_number,
            settings.sheet_url.as_deref(),
            &settings.task_role_name,
            settings.role_removal_hours(),
        );
        let delivery = self.notifier.notify(member, &notice, settings.announce_channel).await;
        let ops_line = match delivery {
            Delivery::Private => format!("✅ DM sent to {} for Task #{}", member.mention(), task_number),
            Delivery::PublicFallback => format!(
                "🚫 DM inaccessible for {} - sent in channel instead.",
                member.mention()
            ),
            Delivery::Undelivered => format!(
                "⚠️ Could not notify {} about Task #{} by DM or in channel.",
                member.mention(),
                task_number
            ),
        };
        self.ops.post(ops_line).await;

        let ledger = self
            .ledger
            .record(settings.sheet_url.as_deref(), task_number, &member.name)
            .await;

        Ok(Settlement {
            task_number,
            member: member.clone(),
            grant,
            delivery,
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::controller::{AllocationController, SharedController};
    use crate::platform::{ChannelId, MockPlatform, UserId};
    use std::time::Duration;

    const ANNOUNCE: ChannelId = ChannelId(100);
    const LOGS: ChannelId = ChannelId(200);
    const SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/abc123/edit";

    fn settings() -> Settings {
        Settings {
            announce_channel: Some(ANNOUNCE),
            logs_channel: Some(LOGS),
            sheet_url: Some(SHEET_URL.to_string()),
            ..Default::default()
        }
    }

    fn setup() -> (Arc<MockPlatform>, Settler) {
        let mock = Arc::new(MockPlatform::new());
        let collaborators = Collaborators::from_mock(mock.clone());
        let controller = SharedController::new(AllocationController::new(settings()));
        let ops = OpsLog::new(collaborators.messaging.clone(), controller);
        let roles = Arc::new(RoleLifecycleManager::new(collaborators.membership.clone(), ops.clone()));
        let settler = Settler::new(&collaborators, roles, ops).with_ledger(
            LedgerWriter::new(collaborators.ledger.clone()).with_retry(3, Duration::from_millis(10)),
        );
        (mock, settler)
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let (mock, settler) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());

        let settlement = settler.settle(&member, 2, &settings(), "test").await.unwrap();

        assert_eq!(settlement.task_number, 2);
        assert_eq!(settlement.delivery, Delivery::Private);
        assert!(settlement.ledger.is_written());
        let role = mock.role_id("TaskHolder").unwrap();
        assert!(mock.member(UserId(10)).unwrap().has_role(role));
        assert_eq!(mock.ledger_cells(), vec![(3, 4, "alice".to_string())]);
        assert_eq!(settler.roles().in_flight(), 1);
        assert!(mock.public_text(LOGS).iter().any(|t| t.contains("DM sent to <@10> for Task #2")));
    }

    #[tokio::test]
    async fn test_permission_failure_reported() {
        let (mock, settler) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        mock.forbid_grant(UserId(10));

        let failure = settler.settle(&member, 1, &settings(), "test").await.unwrap_err();
        assert!(matches!(failure.error, TaskbotError::Permission(_)));
        assert!(mock.ledger_cells().is_empty());
        assert!(mock.private_messages().is_empty());
        assert!(mock.public_text(LOGS).iter().any(|t| t.contains("Permission Error")));
    }

    #[tokio::test]
    async fn test_refused_dm_still_writes_ledger() {
        let (mock, settler) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        mock.refuse_private(UserId(10));

        let settlement = settler.settle(&member, 5, &settings(), "test").await.unwrap();
        assert_eq!(settlement.delivery, Delivery::PublicFallback);
        assert_eq!(mock.ledger_cells(), vec![(6, 4, "alice".to_string())]);
        assert!(mock.public_text(LOGS).iter().any(|t| t.contains("DM inaccessible")));
    }

    #[tokio::test]
    async fn test_ledger_failure_does_not_fail_settlement() {
        let (mock, settler) = setup();
        let member = Member::new(UserId(10), "alice");
        mock.add_member(member.clone());
        mock.fail_ledger_writes(3);

        let settlement = settler.settle(&member, 1, &settings(), "test").await.unwrap();
        assert!(matches!(settlement.ledger, LedgerOutcome::Failed { attempts: 3, .. }));
        let role = mock.role_id("TaskHolder").unwrap();
        assert!(mock.member(UserId(10)).unwrap().has_role(role));
    }
}
