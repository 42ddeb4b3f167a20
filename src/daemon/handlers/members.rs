//! Member request handlers
//!
//! Handles task.assign and identity.verify.

use serde_json::{Value, json};

use crate::daemon::context::DaemonContext;
use crate::error::TaskbotError;
use crate::ipc::messages::{AdminError, AdminResponse, ErrorCode};
use crate::platform::UserId;
use crate::verify::Rejection;

/// Handle task.assign - run the settlement pipeline outside a round.
///
/// The counter is not advanced.
pub async fn handle_task_assign(id: u64, params: &Value, ctx: &DaemonContext) -> AdminResponse {
    let (Some(task), Some(user)) = (params["task"].as_u64(), params["user"].as_u64()) else {
        return AdminResponse::error(id, AdminError::invalid_params("Missing 'task' or 'user' parameter"));
    };
    let user = UserId(user);

    let (settings, counters) = {
        let controller = ctx.controller.lock();
        (controller.settings().clone(), controller.counters())
    };
    if !settings.is_configured() {
        return AdminResponse::error(
            id,
            TaskbotError::Validation("The bot must be configured first.".to_string()).into(),
        );
    }
    if counters.total_tasks == 0 {
        return AdminResponse::error(
            id,
            TaskbotError::Validation(
                "You must start a task batch before you can manually assign one.".to_string(),
            )
            .into(),
        );
    }
    let task = match u32::try_from(task) {
        Ok(task) if (1..=counters.total_tasks).contains(&task) => task,
        _ => {
            return AdminResponse::error(
                id,
                TaskbotError::Validation(format!(
                    "Invalid task number. Please provide a number between 1 and {}.",
                    counters.total_tasks
                ))
                .into(),
            );
        }
    };

    let member = match ctx.collaborators.membership.resolve_member(user).await {
        Ok(Some(member)) => member,
        Ok(None) => {
            return AdminResponse::error(id, TaskbotError::NotFound(format!("member {}", user)).into());
        }
        Err(e) => return AdminResponse::error(id, TaskbotError::from(e).into()),
    };

    let reason = format!("TaskBot: Manual assignment of Task #{}", task);
    match ctx.settler.settle(&member, task, &settings, &reason).await {
        Ok(settlement) => {
            ctx.ops
                .post(format!(
                    "✍️ Task #{} was manually assigned to {} by an administrator.",
                    task,
                    member.mention()
                ))
                .await;
            AdminResponse::success(
                id,
                json!({
                    "message": format!("Successfully assigned Task #{} to {}.", task, member.name),
                    "task": task,
                    "user": member.id,
                    "ledger_written": settlement.ledger.is_written(),
                }),
            )
        }
        Err(failure) => {
            log::error!("Failed to manually assign task: {}", failure.error);
            let error = match failure.error {
                TaskbotError::Permission(_) => AdminError::new(
                    ErrorCode::PERMISSION,
                    format!(
                        "Permission Error! The bot needs 'Manage Roles' and its role must be higher than '{}'.",
                        settings.task_role_name
                    ),
                ),
                other => other.into(),
            };
            AdminResponse::error(id, error)
        }
    }
}

/// Handle identity.verify
pub async fn handle_identity_verify(id: u64, params: &Value, ctx: &DaemonContext) -> AdminResponse {
    let (Some(user), Some(username)) = (params["user"].as_u64(), params["username"].as_str()) else {
        return AdminResponse::error(id, AdminError::invalid_params("Missing 'user' or 'username' parameter"));
    };

    match ctx.verifier.verify(UserId(user), username).await {
        Ok(verified) => AdminResponse::success(
            id,
            json!({
                "message": "You have been successfully verified!",
                "username": verified.username,
                "total": verified.total,
            }),
        ),
        Err(rejection) => {
            let code = match rejection {
                Rejection::MemberNotFound => ErrorCode::NOT_FOUND,
                Rejection::LookupFailed(_) => ErrorCode::TRANSIENT,
                Rejection::GrantFailed(_) => ErrorCode::PERMISSION,
                Rejection::Blocked | Rejection::EmptyUsername | Rejection::Insufficient { .. } => {
                    ErrorCode::VALIDATION
                }
            };
            AdminResponse::error(id, AdminError::new(code, rejection.to_string()))
        }
    }
}
