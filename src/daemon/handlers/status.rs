//! Status and liveness request handlers

use serde_json::json;

use crate::daemon::context::DaemonContext;
use crate::ipc::messages::AdminResponse;
use crate::platform::ChannelId;

fn destination(channel: Option<ChannelId>) -> serde_json::Value {
    match channel {
        Some(channel) => json!(channel.0),
        None => serde_json::Value::Null,
    }
}

/// Handle status - a snapshot of the controller and the loop
pub async fn handle_status(id: u64, ctx: &DaemonContext) -> AdminResponse {
    let loop_running = ctx.loop_running().await;
    let mut snapshot = {
        let controller = ctx.controller.lock();
        let settings = controller.settings();
        let counters = controller.counters();
        let flags = controller.flags();
        json!({
            "current_task": counters.current_task,
            "total_tasks": counters.total_tasks,
            "winners_per_round": counters.winners_per_round,
            "interval_minutes": settings.interval_minutes(),
            "reaction_seconds": settings.reaction_window.as_secs(),
            "removal_hours": settings.role_removal_hours(),
            "announce_channel": destination(settings.announce_channel),
            "logs_channel": destination(settings.logs_channel),
            "verification_channel": destination(settings.verification_channel),
            "ledger_configured": settings.sheet_url.is_some(),
            "batch_label": controller.batch().map(|b| b.label.clone()),
            "is_paused": flags.is_paused,
            "stop_requested": flags.stop_requested,
            "cycle_state": controller.cycle_state(),
            "open_round": controller.open_round(),
        })
    };

    snapshot["loop_running"] = json!(loop_running);
    snapshot["pending_revocations"] = json!(ctx.roles.in_flight());
    AdminResponse::success(id, snapshot)
}

/// Handle ping
pub async fn handle_ping(id: u64) -> AdminResponse {
    AdminResponse::success(id, json!({"message": "Bot is online and responsive!"}))
}
