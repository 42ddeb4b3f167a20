//! Batch request handlers
//!
//! Handles batch.* and settings.configure by driving the controller and the
//! recurring loop.

use serde_json::{Value, json};

use crate::allocation::{BatchRequest, SettingsOverride};
use crate::daemon::context::DaemonContext;
use crate::ipc::messages::{AdminError, AdminResponse};

fn parse<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, AdminError> {
    serde_json::from_value(params.clone()).map_err(|e| AdminError::invalid_params(e.to_string()))
}

/// Handle batch.start - reset counters and (re)start the loop
pub async fn handle_batch_start(id: u64, params: &Value, ctx: &DaemonContext) -> AdminResponse {
    let request: BatchRequest = match parse(params) {
        Ok(request) => request,
        Err(e) => return AdminResponse::error(id, e),
    };
    let total = request.total_tasks;
    let label = request.label.clone();

    let started = ctx.controller.lock().start_batch(request);
    if let Err(e) = started {
        return AdminResponse::error(id, e.into());
    }
    ctx.restart_loop().await;
    ctx.ops
        .post(format!("Task allocation started for {} {} tasks.", total, label))
        .await;
    AdminResponse::success(
        id,
        json!({"message": format!("Task allocation started for {} tasks!", total), "total_tasks": total}),
    )
}

/// Handle batch.pause
pub async fn handle_batch_pause(id: u64, ctx: &DaemonContext) -> AdminResponse {
    let paused = ctx.controller.lock().pause();
    match paused {
        Ok(()) => {
            ctx.ops.post("⏸️ Task allocation paused by an administrator.").await;
            AdminResponse::success(id, json!({"message": "Task allocation has been paused."}))
        }
        Err(e) => AdminResponse::error(id, e.into()),
    }
}

/// Handle batch.resume
pub async fn handle_batch_resume(id: u64, ctx: &DaemonContext) -> AdminResponse {
    let resumed = ctx.controller.lock().resume();
    match resumed {
        Ok(()) => {
            ctx.ops.post("▶️ Task allocation resumed by an administrator.").await;
            AdminResponse::success(id, json!({"message": "Task allocation has been resumed."}))
        }
        Err(e) => AdminResponse::error(id, e.into()),
    }
}

/// Handle batch.stop - fails if no loop is running
pub async fn handle_batch_stop(id: u64, ctx: &DaemonContext) -> AdminResponse {
    if ctx.stop_loop().await {
        log::info!("Task allocation stopped by admin command.");
        ctx.ops.post("🛑 Task allocation stopped by an administrator.").await;
        AdminResponse::success(id, json!({"message": "Task allocation has been stopped."}))
    } else {
        log::warn!("Stop requested but loop was not running.");
        AdminResponse::error(id, AdminError::invalid_state("Task allocation is not currently running."))
    }
}

/// Handle settings.configure - validated partial update
pub async fn handle_settings_configure(id: u64, params: &Value, ctx: &DaemonContext) -> AdminResponse {
    let update: SettingsOverride = match parse(params) {
        Ok(update) => update,
        Err(e) => return AdminResponse::error(id, e),
    };
    let configured = ctx.controller.lock().configure(update);
    let interval_changed = match configured {
        Ok(changed) => changed,
        Err(e) => return AdminResponse::error(id, e.into()),
    };

    let restarted = interval_changed && ctx.loop_running().await;
    if restarted {
        log::info!("Interval changed while running; restarting task loop.");
        ctx.restart_loop().await;
    }
    AdminResponse::success(
        id,
        json!({"message": "Bot settings updated successfully!", "loop_restarted": restarted}),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ipc::messages::ErrorCode;
    use crate::platform::{ChannelId, Collaborators, MockPlatform};
    use std::sync::Arc;

    const LOGS: ChannelId = ChannelId(200);

    fn context(configured: bool) -> (Arc<MockPlatform>, DaemonContext) {
        let mock = Arc::new(MockPlatform::new());
        let mut config = Config::default();
        if configured {
            config.discord.announce_channel_id = Some(100);
            config.discord.logs_channel_id = Some(LOGS.0);
        }
        (mock.clone(), DaemonContext::new(&config, Collaborators::from_mock(mock)))
    }

    #[tokio::test]
    async fn test_start_requires_configuration() {
        let (_mock, ctx) = context(false);
        let resp = handle_batch_start(1, &json!({"total_tasks": 3, "label": "comment"}), &ctx).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::CONFIGURATION);
        assert!(!ctx.loop_running().await);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_params() {
        let (_mock, ctx) = context(true);
        let resp = handle_batch_start(1, &json!({"label": "comment"}), &ctx).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_pause_resume_stop() {
        let (mock, ctx) = context(true);
        let resp = handle_batch_start(1, &json!({"total_tasks": 3, "label": "comment"}), &ctx).await;
        assert!(resp.is_success());
        assert!(ctx.loop_running().await);
        assert!(mock.public_text(LOGS).iter().any(|t| t.contains("started for 3 comment tasks")));

        assert!(handle_batch_pause(2, &ctx).await.is_success());
        let again = handle_batch_pause(3, &ctx).await;
        assert_eq!(again.message(), "Task allocation is already paused.");

        assert!(handle_batch_resume(4, &ctx).await.is_success());
        assert!(!handle_batch_resume(5, &ctx).await.is_success());

        assert!(handle_batch_stop(6, &ctx).await.is_success());
        ctx.join_loop().await;
        let resp = handle_batch_stop(7, &ctx).await;
        assert_eq!(resp.message(), "Task allocation is not currently running.");
    }

    #[tokio::test]
    async fn test_configure_validation_error() {
        let (_mock, ctx) = context(true);
        let resp = handle_settings_configure(1, &json!({"reaction_seconds": 90}), &ctx).await;
        let error = resp.error.unwrap();
        assert_eq!(error.code, ErrorCode::VALIDATION);
        assert_eq!(error.message, "Reaction time must be between 1-60 seconds.");
        assert_eq!(ctx.controller.settings().reaction_window.as_secs(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_restarts_running_loop() {
        let (_mock, ctx) = context(true);
        handle_batch_start(1, &json!({"total_tasks": 3, "label": "comment"}), &ctx).await;

        let resp = handle_settings_configure(2, &json!({"interval_minutes": 5}), &ctx).await;
        assert_eq!(resp.result.unwrap()["loop_restarted"], true);
        assert!(ctx.loop_running().await);

        let resp = handle_settings_configure(3, &json!({"removal_hours": 12}), &ctx).await;
        assert_eq!(resp.result.unwrap()["loop_restarted"], false);
    }
}
