//! Allocation controller - configuration, counters and control flags
//!
//! The controller is an explicit state object shared by the cycle and the
//! admin handlers. Every mutation goes through a transition method, and none
//! of them suspend, so a plain mutex guards it and is never held across an
//! await point.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::round::{RoundId, TaskRange};
use crate::error::{Result, TaskbotError};
use crate::platform::{ChannelId, RoleId};

pub const MAX_TOTAL_TASKS: u32 = 100_000;
pub const MAX_WINNERS_PER_ROUND: u32 = 100;
/// One day
pub const MAX_INTERVAL_MINUTES: u64 = 1440;

/// Runtime settings the cycle reads every iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub interval: Duration,
    pub reaction_window: Duration,
    pub role_removal: Duration,
    /// Winners per round when a batch does not specify one
    pub default_winners: u32,
    pub announce_channel: Option<ChannelId>,
    pub logs_channel: Option<ChannelId>,
    pub verification_channel: Option<ChannelId>,
    pub sheet_url: Option<String>,
    pub ping_role: Option<RoleId>,
    /// Name of the cooldown role granted to winners
    pub task_role_name: String,
    pub selection_emoji: String,
    pub reaction_poll: Duration,
    pub member_fetch_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            reaction_window: Duration::from_secs(10),
            role_removal: Duration::from_secs(6 * 3600),
            default_winners: 1,
            announce_channel: None,
            logs_channel: None,
            verification_channel: None,
            sheet_url: None,
            ping_role: None,
            task_role_name: "TaskHolder".to_string(),
            selection_emoji: "✅".to_string(),
            reaction_poll: Duration::from_millis(250),
            member_fetch_timeout: Duration::from_secs(5),
        }
    }
}

impl Settings {
    /// Announce and logs destinations are both required to run rounds
    pub fn is_configured(&self) -> bool {
        self.announce_channel.is_some() && self.logs_channel.is_some()
    }

    pub fn interval_minutes(&self) -> u64 {
        self.interval.as_secs() / 60
    }

    pub fn role_removal_hours(&self) -> u64 {
        self.role_removal.as_secs() / 3600
    }
}

/// Task counters for the active batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounterState {
    /// Next unassigned task (1-based)
    pub current_task: u32,
    pub total_tasks: u32,
    pub winners_per_round: u32,
}

impl Default for TaskCounterState {
    fn default() -> Self {
        Self {
            current_task: 1,
            total_tasks: 0,
            winners_per_round: 1,
        }
    }
}

impl TaskCounterState {
    pub fn is_complete(&self) -> bool {
        self.current_task > self.total_tasks
    }

    pub fn remaining(&self) -> u32 {
        self.total_tasks.saturating_add(1).saturating_sub(self.current_task)
    }

    /// `min(winners_per_round, remaining)`
    pub fn tasks_next_round(&self) -> u32 {
        self.winners_per_round.min(self.remaining())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags {
    pub is_paused: bool,
    pub stop_requested: bool,
}

/// Descriptive data of the active batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub label: String,
    pub description: String,
}

/// Parameters of a new batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub total_tasks: u32,
    pub label: String,
    #[serde(default)]
    pub winners_per_round: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial runtime configuration update; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverride {
    pub interval_minutes: Option<u64>,
    pub reaction_seconds: Option<u64>,
    pub removal_hours: Option<u64>,
    pub announce_channel: Option<ChannelId>,
    pub logs_channel: Option<ChannelId>,
    pub verification_channel: Option<ChannelId>,
    pub sheet_url: Option<String>,
    pub ping_role: Option<RoleId>,
}

impl SettingsOverride {
    /// Check ranges without touching any state
    pub fn validate(&self) -> Result<()> {
        if let Some(minutes) = self.interval_minutes
            && !(1..=MAX_INTERVAL_MINUTES).contains(&minutes)
        {
            return Err(TaskbotError::Validation(format!(
                "Interval must be between 1-{} minutes.",
                MAX_INTERVAL_MINUTES
            )));
        }
        if let Some(seconds) = self.reaction_seconds
            && !(1..=60).contains(&seconds)
        {
            return Err(TaskbotError::Validation(
                "Reaction time must be between 1-60 seconds.".to_string(),
            ));
        }
        if let Some(hours) = self.removal_hours
            && !(1..=168).contains(&hours)
        {
            return Err(TaskbotError::Validation(
                "Role removal hours must be between 1-168 hours (1 week).".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the allocation cycle currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    #[default]
    Idle,
    Announced,
    Resolving,
    Settling,
    Completed,
    Stopped,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Completed | CycleState::Stopped)
    }
}

/// What the next tick should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Stop,
    Pause,
    NotConfigured,
    Complete,
    Open(RoundPlan),
}

/// A round the controller has approved for opening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundPlan {
    pub task_range: TaskRange,
    pub generation: u64,
    pub settings: Settings,
    pub batch: Batch,
}

/// Process-wide allocation state
#[derive(Debug, Clone)]
pub struct AllocationController {
    settings: Settings,
    counters: TaskCounterState,
    flags: ControlFlags,
    batch: Option<Batch>,
    /// Bumped on every batch start so stale rounds cannot touch new counters
    generation: u64,
    open_round: Option<RoundId>,
    cycle_state: CycleState,
}

impl AllocationController {
    pub fn new(settings: Settings) -> Self {
        let counters = TaskCounterState {
            winners_per_round: settings.default_winners,
            ..Default::default()
        };
        Self {
            settings,
            counters,
            flags: ControlFlags::default(),
            batch: None,
            generation: 0,
            open_round: None,
            cycle_state: CycleState::Idle,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn counters(&self) -> TaskCounterState {
        self.counters
    }

    pub fn flags(&self) -> ControlFlags {
        self.flags
    }

    pub fn batch(&self) -> Option<&Batch> {
        self.batch.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn open_round(&self) -> Option<RoundId> {
        self.open_round
    }

    pub fn cycle_state(&self) -> CycleState {
        self.cycle_state
    }

    pub fn set_cycle_state(&mut self, state: CycleState) {
        if state != self.cycle_state {
            log::debug!("Cycle state {:?} -> {:?}", self.cycle_state, state);
            self.cycle_state = state;
        }
    }

    /// Start a new batch: counters reset, flags cleared
    pub fn start_batch(&mut self, request: BatchRequest) -> Result<()> {
        if !self.settings.is_configured() {
            return Err(TaskbotError::Configuration(
                "Bot not configured! Announce and logs channels must be set.".to_string(),
            ));
        }
        if !(1..=MAX_TOTAL_TASKS).contains(&request.total_tasks) {
            return Err(TaskbotError::Validation(format!(
                "Total tasks must be between 1-{}.",
                MAX_TOTAL_TASKS
            )));
        }
        let winners = request.winners_per_round.unwrap_or(self.settings.default_winners);
        if !(1..=MAX_WINNERS_PER_ROUND).contains(&winners) {
            return Err(TaskbotError::Validation(format!(
                "Winners per round must be between 1-{}.",
                MAX_WINNERS_PER_ROUND
            )));
        }

        self.generation += 1;
        self.counters = TaskCounterState {
            current_task: 1,
            total_tasks: request.total_tasks,
            winners_per_round: winners,
        };
        self.flags = ControlFlags::default();
        self.cycle_state = CycleState::Idle;
        self.batch = Some(Batch {
            label: request.label,
            description: request.description.unwrap_or_default(),
        });
        log::info!(
            "Batch {} started: {} tasks, {} winner(s) per round",
            self.generation,
            request.total_tasks,
            winners
        );
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.flags.is_paused {
            return Err(TaskbotError::InvalidState("Task allocation is already paused.".to_string()));
        }
        self.flags.is_paused = true;
        log::info!("Task allocation paused.");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if !self.flags.is_paused {
            return Err(TaskbotError::InvalidState(
                "Task allocation is not currently paused.".to_string(),
            ));
        }
        self.flags.is_paused = false;
        log::info!("Task allocation resumed.");
        Ok(())
    }

    pub fn request_stop(&mut self) {
        self.flags.stop_requested = true;
    }

    /// Apply an override; returns true if the interval changed
    pub fn configure(&mut self, update: SettingsOverride) -> Result<bool> {
        update.validate()?;

        let mut interval_changed = false;
        if let Some(minutes) = update.interval_minutes {
            let interval = Duration::from_secs(minutes.saturating_mul(60));
            interval_changed = interval != self.settings.interval;
            self.settings.interval = interval;
            log::info!("Interval overridden to: {} minutes", minutes);
        }
        if let Some(seconds) = update.reaction_seconds {
            self.settings.reaction_window = Duration::from_secs(seconds);
            log::info!("Reaction time overridden to: {} seconds", seconds);
        }
        if let Some(hours) = update.removal_hours {
            self.settings.role_removal = Duration::from_secs(hours.saturating_mul(3600));
            log::info!("Role removal time overridden to: {} hours", hours);
        }
        if let Some(channel) = update.announce_channel {
            self.settings.announce_channel = Some(channel);
            log::info!("Announce channel overridden to: {}", channel);
        }
        if let Some(channel) = update.logs_channel {
            self.settings.logs_channel = Some(channel);
            log::info!("Logs channel overridden to: {}", channel);
        }
        if let Some(channel) = update.verification_channel {
            self.settings.verification_channel = Some(channel);
            log::info!("Verification channel overridden to: {}", channel);
        }
        if let Some(url) = update.sheet_url {
            log::info!("Sheets URL overridden to: {}", url);
            self.settings.sheet_url = Some(url);
        }
        if let Some(role) = update.ping_role {
            self.settings.ping_role = Some(role);
            log::info!("Ping role overridden to: {}", role);
        }
        Ok(interval_changed)
    }

    /// Decide what the next tick does, in the order the cycle must check
    pub fn next_action(&self) -> NextAction {
        if self.flags.stop_requested {
            return NextAction::Stop;
        }
        if self.flags.is_paused {
            return NextAction::Pause;
        }
        if !self.settings.is_configured() {
            return NextAction::NotConfigured;
        }
        let tasks = self.counters.tasks_next_round();
        if self.counters.is_complete() || tasks == 0 {
            return NextAction::Complete;
        }
        NextAction::Open(RoundPlan {
            task_range: TaskRange::new(self.counters.current_task, tasks),
            generation: self.generation,
            settings: self.settings.clone(),
            batch: self.batch.clone().unwrap_or(Batch {
                label: "Task".to_string(),
                description: String::new(),
            }),
        })
    }

    /// Mark a round open; only one may be open at a time
    pub fn begin_round(&mut self, round: RoundId) -> Result<()> {
        if let Some(open) = self.open_round {
            return Err(TaskbotError::InvalidState(format!("round {} is already open", open)));
        }
        self.open_round = Some(round);
        Ok(())
    }

    pub fn end_round(&mut self, round: RoundId) {
        if self.open_round == Some(round) {
            self.open_round = None;
        }
    }

    /// Advance `current_task` by the number of settled winners.
    ///
    /// Ignored if the batch changed since the round opened.
    pub fn record_settled(&mut self, generation: u64, settled: u32) -> u32 {
        if generation != self.generation {
            log::warn!(
                "Discarding {} settlement(s) from batch {}; batch {} is active",
                settled,
                generation,
                self.generation
            );
            return self.counters.current_task;
        }
        self.counters.current_task = self.counters.current_task.saturating_add(settled);
        self.counters.current_task
    }
}

/// Cloneable handle to the controller
#[derive(Debug, Clone)]
pub struct SharedController(Arc<Mutex<AllocationController>>);

impl SharedController {
    pub fn new(controller: AllocationController) -> Self {
        Self(Arc::new(Mutex::new(controller)))
    }

    /// Lock the controller. Never hold the guard across an await.
    pub fn lock(&self) -> MutexGuard<'_, AllocationController> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Settings {
        Settings {
            announce_channel: Some(ChannelId(1)),
            logs_channel: Some(ChannelId(2)),
            ..Default::default()
        }
    }

    fn batch(total: u32, winners: Option<u32>) -> BatchRequest {
        BatchRequest {
            total_tasks: total,
            label: "comment".to_string(),
            winners_per_round: winners,
            description: None,
        }
    }

    #[test]
    fn test_new_controller_has_nothing_to_do() {
        let controller = AllocationController::new(configured());
        assert_eq!(controller.counters().current_task, 1);
        assert_eq!(controller.next_action(), NextAction::Complete);
    }

    #[test]
    fn test_start_batch_requires_configuration() {
        let mut controller = AllocationController::new(Settings::default());
        let err = controller.start_batch(batch(3, None)).unwrap_err();
        assert!(matches!(err, TaskbotError::Configuration(_)));
        assert_eq!(controller.generation(), 0);
    }

    #[test]
    fn test_new_batch_leaves_completed_state() {
        let mut controller = AllocationController::new(configured());
        controller.set_cycle_state(CycleState::Completed);
        controller.start_batch(batch(1, None)).unwrap();
        assert_eq!(controller.cycle_state(), CycleState::Idle);
    }

    #[test]
    fn test_start_batch_rejects_zero_tasks() {
        let mut controller = AllocationController::new(configured());
        let err = controller.start_batch(batch(0, None)).unwrap_err();
        assert!(matches!(err, TaskbotError::Validation(_)));
    }

    #[test]
    fn test_first_round_plan() {
        let mut controller = AllocationController::new(configured());
        controller.start_batch(batch(3, Some(2))).unwrap();
        match controller.next_action() {
            NextAction::Open(plan) => {
                assert_eq!(plan.task_range, TaskRange::new(1, 2));
                assert_eq!(plan.generation, 1);
                assert_eq!(plan.batch.label, "comment");
            }
            other => panic!("expected open round, got {:?}", other),
        }
    }

    #[test]
    fn test_last_round_is_clamped_to_remaining() {
        let mut controller = AllocationController::new(configured());
        controller.start_batch(batch(3, Some(2))).unwrap();
        controller.record_settled(1, 2);
        match controller.next_action() {
            NextAction::Open(plan) => assert_eq!(plan.task_range, TaskRange::new(3, 1)),
            other => panic!("expected open round, got {:?}", other),
        }
        controller.record_settled(1, 1);
        assert_eq!(controller.next_action(), NextAction::Complete);
    }

    #[test]
    fn test_stop_takes_precedence_over_pause() {
        let mut controller = AllocationController::new(configured());
        controller.start_batch(batch(3, None)).unwrap();
        controller.pause().unwrap();
        assert_eq!(controller.next_action(), NextAction::Pause);
        controller.request_stop();
        assert_eq!(controller.next_action(), NextAction::Stop);
    }

    #[test]
    fn test_pause_resume_round_trip_preserves_plan() {
        let mut controller = AllocationController::new(configured());
        controller.start_batch(batch(5, Some(2))).unwrap();
        controller.record_settled(1, 1);
        let before = controller.next_action();

        controller.pause().unwrap();
        assert!(controller.pause().is_err());
        controller.resume().unwrap();
        assert!(controller.resume().is_err());

        assert_eq!(controller.next_action(), before);
    }

    #[test]
    fn test_not_configured_skips() {
        let mut controller = AllocationController::new(configured());
        controller.start_batch(batch(2, None)).unwrap();
        controller.settings.announce_channel = None;
        assert_eq!(controller.next_action(), NextAction::NotConfigured);
    }

    #[test]
    fn test_configure_rejects_without_partial_effect() {
        let mut controller = AllocationController::new(configured());
        let before = controller.settings().clone();
        let update = SettingsOverride {
            interval_minutes: Some(5),
            reaction_seconds: Some(61),
            ..Default::default()
        };
        assert!(matches!(controller.configure(update), Err(TaskbotError::Validation(_))));
        assert_eq!(controller.settings(), &before);
    }

    #[test]
    fn test_configure_applies_and_reports_interval_change() {
        let mut controller = AllocationController::new(configured());
        let changed = controller
            .configure(SettingsOverride {
                interval_minutes: Some(5),
                removal_hours: Some(12),
                sheet_url: Some("https://docs.google.com/spreadsheets/d/x/edit".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(changed);
        assert_eq!(controller.settings().interval_minutes(), 5);
        assert_eq!(controller.settings().role_removal_hours(), 12);

        let changed = controller
            .configure(SettingsOverride {
                interval_minutes: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_removal_hours_bounds() {
        let too_long = SettingsOverride {
            removal_hours: Some(169),
            ..Default::default()
        };
        assert!(too_long.validate().is_err());
        let zero_interval = SettingsOverride {
            interval_minutes: Some(0),
            ..Default::default()
        };
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_extreme_batch_sizes_rejected() {
        let mut controller = AllocationController::new(configured());
        for request in [
            batch(u32::MAX, None),
            batch(MAX_TOTAL_TASKS + 1, None),
            batch(5, Some(u32::MAX)),
            batch(5, Some(0)),
        ] {
            let err = controller.start_batch(request).unwrap_err();
            assert!(matches!(err, TaskbotError::Validation(_)), "{:?}", err);
        }
        assert_eq!(controller.generation(), 0);
        assert_eq!(controller.counters(), TaskCounterState::default());

        controller.start_batch(batch(MAX_TOTAL_TASKS, None)).unwrap();
        assert_eq!(controller.counters().remaining(), MAX_TOTAL_TASKS);
    }

    #[test]
    fn test_counter_arithmetic_saturates() {
        let counters = TaskCounterState {
            current_task: 1,
            total_tasks: u32::MAX,
            winners_per_round: 3,
        };
        assert_eq!(counters.remaining(), u32::MAX);
        assert_eq!(counters.tasks_next_round(), 3);

        let mut controller = AllocationController::new(configured());
        controller.start_batch(batch(2, None)).unwrap();
        assert_eq!(controller.record_settled(1, u32::MAX), u32::MAX);
        assert_eq!(controller.next_action(), NextAction::Complete);
    }

    #[test]
    fn test_huge_interval_rejected_without_change() {
        let mut controller = AllocationController::new(configured());
        let before = controller.settings().clone();
        for minutes in [u64::MAX, u64::MAX / 2, MAX_INTERVAL_MINUTES + 1] {
            let update = SettingsOverride {
                interval_minutes: Some(minutes),
                ..Default::default()
            };
            assert!(matches!(controller.configure(update), Err(TaskbotError::Validation(_))));
        }
        assert_eq!(controller.settings(), &before);

        let changed = controller
            .configure(SettingsOverride {
                interval_minutes: Some(MAX_INTERVAL_MINUTES),
                ..Default::default()
            })
            .unwrap();
        assert!(changed);
        assert_eq!(controller.settings().interval_minutes(), MAX_INTERVAL_MINUTES);
    }

    #[test]
    fn test_single_round_invariant() {
        let mut controller = AllocationController::new(configured());
        controller.begin_round(RoundId(1)).unwrap();
        assert!(controller.begin_round(RoundId(2)).is_err());
        controller.end_round(RoundId(2));
        assert_eq!(controller.open_round(), Some(RoundId(1)));
        controller.end_round(RoundId(1));
        controller.begin_round(RoundId(2)).unwrap();
    }

    #[test]
    fn test_stale_generation_does_not_advance() {
        let mut controller = AllocationController::new(configured());
        controller.start_batch(batch(10, None)).unwrap();
        controller.start_batch(batch(10, None)).unwrap();
        assert_eq!(controller.record_settled(1, 3), 1);
        assert_eq!(controller.record_settled(2, 3), 4);
    }

    #[test]
    fn test_shared_controller_lock() {
        let shared = SharedController::new(AllocationController::new(configured()));
        shared.lock().request_stop();
        assert!(shared.lock().flags().stop_requested);
        shared.lock().set_cycle_state(CycleState::Stopped);
        assert!(shared.lock().cycle_state().is_terminal());
        assert_eq!(shared.settings().announce_channel, Some(ChannelId(1)));
    }
}
