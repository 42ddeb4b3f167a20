//! Allocation cycle integration tests
//!
//! Drives whole rounds through the daemon context against the in-memory
//! platform, and the admin socket end to end.

use std::sync::Arc;
use std::time::Duration;

use taskbot::allocation::ledger::WINNER_COLUMN;
use serde_json::json;
use taskbot::allocation::{BatchRequest, CycleState, Delivery, LedgerOutcome, TaskRange, TickOutcome};
use taskbot::config::Config;
use taskbot::daemon::{self, DaemonContext, handlers::handle_settings_configure};
use taskbot::ipc::IpcClient;
use taskbot::platform::{ChannelId, Collaborators, Member, MockPlatform, Reputation, UserId};
use taskbot::verify::Rejection;
use tempfile::TempDir;

const ANNOUNCE: ChannelId = ChannelId(100);
const LOGS: ChannelId = ChannelId(200);
const SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/abc123/edit";

fn config() -> Config {
    let mut config = Config::default();
    config.discord.announce_channel_id = Some(ANNOUNCE.0);
    config.discord.logs_channel_id = Some(LOGS.0);
    config.ledger.sheet_url = Some(SHEET_URL.to_string());
    config
}

fn context(total: u32, winners: u32) -> (Arc<MockPlatform>, DaemonContext) {
    let mock = Arc::new(MockPlatform::new());
    let ctx = DaemonContext::new(&config(), Collaborators::from_mock(mock.clone()));
    ctx.controller
        .lock()
        .start_batch(BatchRequest {
            total_tasks: total,
            label: "comment".to_string(),
            winners_per_round: Some(winners),
            description: None,
        })
        .unwrap();
    (mock, ctx)
}

fn current_task(ctx: &DaemonContext) -> u32 {
    ctx.controller.lock().counters().current_task
}

#[tokio::test(start_paused = true)]
async fn test_partial_round_reoffers_remaining_range() {
    let (mock, ctx) = context(3, 2);
    mock.add_member(Member::new(UserId(10), "alice"));
    mock.queue_reaction(UserId(10), "✅", Duration::from_secs(2));

    match ctx.cycle.tick().await {
        TickOutcome::Resolved(summary) => {
            assert_eq!(summary.task_range, TaskRange::new(1, 2));
            assert_eq!(summary.settled_count(), 1);
            assert_eq!(summary.settled[0].task_number, 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(current_task(&ctx), 2);

    // Nobody reacts the second time; the range offered is #2-#3
    match ctx.cycle.tick().await {
        TickOutcome::Unclaimed(range) => assert_eq!(range, TaskRange::new(2, 2)),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(current_task(&ctx), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unclaimed_round_is_reoffered() {
    let (mock, ctx) = context(3, 1);

    assert!(matches!(ctx.cycle.tick().await, TickOutcome::Unclaimed(range) if range == TaskRange::new(1, 1)));
    assert!(matches!(ctx.cycle.tick().await, TickOutcome::Unclaimed(range) if range == TaskRange::new(1, 1)));
    assert_eq!(current_task(&ctx), 1);
    let unclaimed = mock
        .public_text(ANNOUNCE)
        .iter()
        .filter(|t| t.contains("Task Unclaimed"))
        .count();
    assert_eq!(unclaimed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_holder_never_selected() {
    let (mock, ctx) = context(5, 1);
    let cooldown = mock.add_role("TaskHolder");
    mock.add_member(Member::new(UserId(10), "holder").with_role(cooldown));
    mock.add_member(Member::new(UserId(11), "fresh"));
    mock.queue_reaction(UserId(10), "✅", Duration::from_secs(1));
    mock.queue_reaction(UserId(11), "✅", Duration::from_secs(4));

    match ctx.cycle.tick().await {
        TickOutcome::Resolved(summary) => {
            assert_eq!(summary.settled_count(), 1);
            assert_eq!(summary.settled[0].member.id, UserId(11));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_refused_dm_falls_back_and_still_records() {
    let (mock, ctx) = context(3, 1);
    mock.add_member(Member::new(UserId(10), "alice"));
    mock.refuse_private(UserId(10));
    mock.queue_reaction(UserId(10), "✅", Duration::from_secs(1));

    match ctx.cycle.tick().await {
        TickOutcome::Resolved(summary) => {
            let settlement = &summary.settled[0];
            assert_eq!(settlement.delivery, Delivery::PublicFallback);
            assert!(settlement.ledger.is_written());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(
        mock.public_text(ANNOUNCE)
            .iter()
            .any(|t| t.contains("<@10>, your DMs are closed!"))
    );
    let cells = mock.ledger_cells();
    assert_eq!(cells.len(), 1);
    assert_eq!((cells[0].0, cells[0].1), (2, WINNER_COLUMN));
}

#[tokio::test(start_paused = true)]
async fn test_ledger_exhaustion_keeps_settlement() {
    let (mock, ctx) = context(3, 1);
    mock.add_member(Member::new(UserId(10), "alice"));
    mock.fail_ledger_writes(3);
    mock.queue_reaction(UserId(10), "✅", Duration::from_secs(1));

    match ctx.cycle.tick().await {
        TickOutcome::Resolved(summary) => {
            assert_eq!(summary.settled_count(), 1);
            assert!(matches!(summary.settled[0].ledger, LedgerOutcome::Failed { attempts: 3, .. }));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(mock.ledger_attempts(), 3);
    assert_eq!(current_task(&ctx), 2);
    let role = mock.role_id("TaskHolder").unwrap();
    assert!(mock.member(UserId(10)).unwrap().has_role(role));
}

#[tokio::test(start_paused = true)]
async fn test_interval_change_during_settlement_keeps_counter() {
    let (mock, ctx) = context(3, 1);
    mock.add_member(Member::new(UserId(10), "alice"));
    mock.add_member(Member::new(UserId(11), "carol"));
    mock.fail_ledger_writes(2);
    mock.queue_reaction(UserId(10), "✅", Duration::from_secs(1));
    ctx.restart_loop().await;

    // Carol's reaction goes on the second announcement
    tokio::time::sleep(Duration::from_millis(500)).await;
    mock.queue_reaction(UserId(11), "✅", Duration::from_secs(1));

    // Round one is backing off between ledger attempts
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(ctx.controller.lock().cycle_state(), CycleState::Settling);
    let resp = handle_settings_configure(1, &json!({"interval_minutes": 5}), &ctx).await;
    assert!(resp.is_success());
    assert_eq!(resp.result.unwrap()["loop_restarted"], true);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(current_task(&ctx), 3);
    assert_eq!(mock.announcements().len(), 2);
    let cells = mock.ledger_cells();
    assert!(cells.contains(&(2, WINNER_COLUMN, "alice".to_string())));
    assert!(cells.contains(&(3, WINNER_COLUMN, "carol".to_string())));
    for user in [UserId(10), UserId(11)] {
        let dms = mock.private_messages().iter().filter(|(to, _)| *to == user).count();
        assert_eq!(dms, 1, "{} was notified {} times", user, dms);
    }
    assert!(
        mock.public_text(ANNOUNCE)
            .iter()
            .any(|t| t.contains("Congratulations **<@11>**! You have been assigned Task #2."))
    );
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_reproduces_next_round() {
    let (_mock, ctx) = context(4, 2);

    ctx.controller.lock().pause().unwrap();
    assert!(matches!(ctx.cycle.tick().await, TickOutcome::Skipped(_)));
    ctx.controller.lock().resume().unwrap();

    assert!(matches!(ctx.cycle.tick().await, TickOutcome::Unclaimed(range) if range == TaskRange::new(1, 2)));
    assert_eq!(current_task(&ctx), 1);
}

#[tokio::test]
async fn test_low_reputation_rejected_without_side_effects() {
    let (mock, ctx) = context(3, 1);
    mock.add_member(Member::new(UserId(10), "alice"));
    mock.set_reputation("alice_r", Reputation::new(30, 40));

    match ctx.verifier.verify(UserId(10), "alice_r").await {
        Err(rejection @ Rejection::Insufficient { .. }) => {
            assert_eq!(rejection.shortfall(), Some(30));
            assert!(rejection.to_string().contains("30"));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(mock.role_id("Verified").is_none());
    assert!(mock.ledger_cells().is_empty());
}

#[tokio::test]
async fn test_admin_socket_end_to_end() {
    let temp = TempDir::new().unwrap();
    let mut config = config();
    config.keepalive.enabled = false;
    config.allocation.reaction_seconds = 1;
    config.ipc.socket_path = temp.path().join("taskbot.sock");
    let socket = config.ipc.socket_path.clone();

    let mock = Arc::new(MockPlatform::new());
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let service = tokio::spawn(async move {
        daemon::serve(&config, Collaborators::from_mock(mock), async move {
            let _ = rx.await;
        })
        .await
    });

    let client = IpcClient::with_socket(&socket);
    let mut connected = false;
    for _ in 0..100 {
        if client.connect().await.is_ok() {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connected, "service never opened {}", socket.display());

    assert!(client.ping().await.unwrap());

    let started = client
        .start_batch(&BatchRequest {
            total_tasks: 3,
            label: "upvote".to_string(),
            winners_per_round: None,
            description: None,
        })
        .await
        .unwrap();
    assert!(started.is_success(), "{:?}", started.error);

    let status = client.status().await.unwrap().result.unwrap();
    assert_eq!(status["total_tasks"], 3);
    assert_eq!(status["loop_running"], true);

    let stopped = client.stop().await.unwrap();
    assert!(stopped.is_success());

    tx.send(()).unwrap();
    service.await.unwrap().unwrap();
}
