//! AllocationCycle - the timed announce, wait, resolve, settle state machine
//!
//! One tick runs at most one round end to end. The controller decides
//! whether a round opens; the cycle owns everything between the announcement
//! and the counter advance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

use super::controller::{CycleState, NextAction, RoundPlan, Settings, SharedController};
use super::eligibility::EligibilityResolver;
use super::notify::OpsLog;
use super::reactions::ReactionBook;
use super::round::{AllocationRound, RoundId, TaskRange};
use super::selector::select_winners;
use super::settlement::{Settlement, SettlementFailure, Settler};
use crate::platform::{ChannelId, Collaborators, Membership, Messaging, Notice, NoticeTone, PlatformError};

/// How long a role ping stays in the channel
const PING_LIFETIME: Duration = Duration::from_secs(1);

/// Why a tick did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    NotConfigured,
}

/// Per-winner results of one resolved round
#[derive(Debug)]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub task_range: TaskRange,
    pub settled: Vec<Settlement>,
    pub failed: Vec<SettlementFailure>,
}

impl RoundSummary {
    pub fn settled_count(&self) -> u32 {
        self.settled.len() as u32
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Stopped,
    Completed,
    /// Nobody eligible reacted; the range is offered again next tick
    Unclaimed(TaskRange),
    Resolved(RoundSummary),
    /// A new batch started while the round was open; nothing settled
    Abandoned(TaskRange),
    /// Announcing or reading the round failed; nothing advanced
    Failed(String),
}

impl TickOutcome {
    /// The recurring loop ends after this outcome
    pub fn is_terminal(&self) -> bool {
        matches!(self, TickOutcome::Stopped | TickOutcome::Completed)
    }
}

/// Wake-up and retirement signals for one run of the recurring loop
#[derive(Debug, Default)]
pub struct LoopSignals {
    wake: Notify,
    retiring: AtomicBool,
}

impl LoopSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run the next tick now
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Exit once the tick in progress has finished; never interrupts a round
    pub fn retire(&self) {
        self.retiring.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_retiring(&self) -> bool {
        self.retiring.load(Ordering::SeqCst)
    }
}

/// Closes the round and purges its reactions however the round ends
struct RoundGuard<'a> {
    controller: &'a SharedController,
    reactions: &'a ReactionBook,
    round: RoundId,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.reactions.purge(self.round);
        let mut controller = self.controller.lock();
        controller.end_round(self.round);
        if matches!(
            controller.cycle_state(),
            CycleState::Announced | CycleState::Resolving | CycleState::Settling
        ) {
            controller.set_cycle_state(CycleState::Idle);
        }
    }
}

pub struct AllocationCycle {
    controller: SharedController,
    messaging: Arc<dyn Messaging>,
    membership: Arc<dyn Membership>,
    reactions: ReactionBook,
    resolver: EligibilityResolver,
    settler: Arc<Settler>,
    ops: OpsLog,
}

impl AllocationCycle {
    pub fn new(
        controller: SharedController,
        collaborators: &Collaborators,
        reactions: ReactionBook,
        settler: Arc<Settler>,
        ops: OpsLog,
    ) -> Self {
        let fetch_timeout = controller.settings().member_fetch_timeout;
        Self {
            resolver: EligibilityResolver::new(collaborators.membership.clone(), fetch_timeout),
            messaging: collaborators.messaging.clone(),
            membership: collaborators.membership.clone(),
            controller,
            reactions,
            settler,
            ops,
        }
    }

    pub fn controller(&self) -> &SharedController {
        &self.controller
    }

    pub fn reactions(&self) -> &ReactionBook {
        &self.reactions
    }

    /// Recurring timer: first tick immediately, then every interval from the
    /// start of the previous tick. Returns when the batch completes or stops,
    /// or between ticks once retired.
    pub async fn run(self: Arc<Self>, signals: Arc<LoopSignals>) -> CycleState {
        let interval = self.controller.settings().interval;
        log::info!(
            "Task loop started with a {}-minute interval.",
            interval.as_secs() / 60
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = signals.wake.notified() => {}
                _ = ticker.tick() => {}
            }
            if signals.is_retiring() {
                log::info!("Task loop retired.");
                break;
            }
            let outcome = self.tick().await;
            if outcome.is_terminal() {
                break;
            }
        }
        let state = self.controller.lock().cycle_state();
        log::info!("Task loop ended in state {:?}", state);
        state
    }

    /// One timer fire
    pub async fn tick(&self) -> TickOutcome {
        let (action, counters) = {
            let controller = self.controller.lock();
            (controller.next_action(), controller.counters())
        };
        log::info!(
            "--- Task Loop Cycle --- Current Task: #{}/{} ---",
            counters.current_task,
            counters.total_tasks
        );

        match action {
            NextAction::Stop => {
                log::info!("Loop cycle aborted: stop was requested.");
                self.set_state(CycleState::Stopped);
                TickOutcome::Stopped
            }
            NextAction::Pause => {
                log::info!("Task allocation is paused. Skipping this cycle.");
                TickOutcome::Skipped(SkipReason::Paused)
            }
            NextAction::NotConfigured => {
                log::warn!("Loop is not configured or announce channel not set. Skipping cycle.");
                TickOutcome::Skipped(SkipReason::NotConfigured)
            }
            NextAction::Complete => {
                log::info!("All tasks have been assigned. Stopping loop.");
                self.set_state(CycleState::Completed);
                self.ops.post("All tasks have been completed!").await;
                TickOutcome::Completed
            }
            NextAction::Open(plan) => self.run_round(plan).await,
        }
    }

    async fn run_round(&self, plan: RoundPlan) -> TickOutcome {
        let settings = &plan.settings;
        let Some(channel) = settings.announce_channel else {
            return TickOutcome::Skipped(SkipReason::NotConfigured);
        };
        let range = plan.task_range;
        log::info!("Posting for {} task(s), starting from #{}.", range.len(), range.start);

        let announcement = match self
            .messaging
            .send_announcement(channel, &announcement_notice(&plan))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("CRITICAL: Failed to post task announcement: {}", e);
                return TickOutcome::Failed(e.to_string());
            }
        };
        let round = AllocationRound::open(announcement, range, settings.reaction_window, plan.generation);
        let begun = self.controller.lock().begin_round(round.round_id);
        if let Err(e) = begun {
            log::error!("CRITICAL: Cannot open round {}: {}", round.round_id, e);
            return TickOutcome::Failed(e.to_string());
        }
        let _guard = RoundGuard {
            controller: &self.controller,
            reactions: &self.reactions,
            round: round.round_id,
        };
        self.reactions.open(round.round_id);
        self.set_state(CycleState::Announced);

        if let Err(e) = self
            .messaging
            .add_reaction(&round.announcement, &settings.selection_emoji)
            .await
        {
            log::warn!("Could not add selection reaction to {}: {}", round.round_id, e);
        }
        log::info!(
            "Task announcement posted (Message ID: {}). Waiting {}s for reactions.",
            round.round_id,
            round.reaction_window_seconds()
        );
        self.ping_role(settings, channel).await;

        self.collect_reactions(&round, settings.reaction_poll).await;

        if self.controller.lock().flags().stop_requested {
            log::info!("Stop command received during reaction period. Halting current task cycle.");
            self.set_state(CycleState::Stopped);
            return TickOutcome::Stopped;
        }
        if self.controller.lock().generation() != plan.generation {
            log::info!("A new batch started during round {}. Abandoning it.", round.round_id);
            return TickOutcome::Abandoned(range);
        }

        self.set_state(CycleState::Resolving);
        log::info!("Reaction period ended for round {}. Processing reactions.", round.round_id);
        let reactions = match self.messaging.fetch_reactions(&round.announcement).await {
            Ok(reactions) => reactions,
            Err(e) => {
                log::error!("CRITICAL: Failed to fetch reactions for round {}: {}", round.round_id, e);
                return TickOutcome::Failed(e.to_string());
            }
        };
        self.reactions
            .observe(round.round_id, &reactions, observed_at(&round, round.reaction_window));
        let first_seen = self.reactions.snapshot(round.round_id);

        let cooldown_role = match self.membership.find_role(&settings.task_role_name).await {
            Ok(role) => role,
            Err(e) => {
                log::error!("CRITICAL: Could not look up the '{}' role: {}", settings.task_role_name, e);
                return TickOutcome::Failed(e.to_string());
            }
        };
        let candidates = self
            .resolver
            .resolve(&reactions, &first_seen, &settings.selection_emoji, cooldown_role)
            .await;

        if candidates.is_empty() {
            log::info!("No eligible reactors found for this task.");
            self.post_public(channel, unclaimed_notice(range, settings.interval_minutes()))
                .await;
            return TickOutcome::Unclaimed(range);
        }

        let winners = select_winners(candidates, range.len());
        self.set_state(CycleState::Settling);

        let mut summary = RoundSummary {
            round_id: round.round_id,
            task_range: range,
            settled: Vec::new(),
            failed: Vec::new(),
        };
        for (i, winner) in winners.iter().enumerate() {
            // Numbers go to successful settlements only, in selection order.
            let task_number = range.start + summary.settled_count();
            log::info!(
                "Processing winner {}: {} for Task #{}",
                i + 1,
                winner.member.name,
                task_number
            );
            let reason = format!("TaskBot: Assigned Task #{}", task_number);
            match self.settler.settle(&winner.member, task_number, settings, &reason).await {
                Ok(settlement) => summary.settled.push(settlement),
                Err(failure) => {
                    log::error!(
                        "Failed to process winner {}: {}. Skipping to next winner.",
                        failure.member.name,
                        failure.error
                    );
                    summary.failed.push(failure);
                }
            }
        }

        if summary.settled.is_empty() {
            log::warn!("No winners were successfully assigned despite eligible reactors.");
            self.ops
                .post(format!(
                    "⚠️ No winners could be assigned for {} despite eligible reactors. The tasks will be reposted.",
                    range.label()
                ))
                .await;
        } else {
            let current = self
                .controller
                .lock()
                .record_settled(plan.generation, summary.settled_count());
            log::info!("Assignment complete. New current task is #{}.", current);
            self.post_public(channel, congratulations_notice(&summary.settled)).await;
        }
        TickOutcome::Resolved(summary)
    }

    /// Poll reactions until the window closes
    async fn collect_reactions(&self, round: &AllocationRound, poll: Duration) {
        let started = Instant::now();
        let deadline = started + round.reaction_window;
        loop {
            match self.messaging.fetch_reactions(&round.announcement).await {
                Ok(entries) => {
                    let at = observed_at(round, started.elapsed());
                    self.reactions.observe(round.round_id, &entries, at);
                }
                Err(e) => log::debug!("Reaction poll for round {} failed: {}", round.round_id, e),
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    async fn ping_role(&self, settings: &Settings, channel: ChannelId) {
        let Some(role) = settings.ping_role else {
            return;
        };
        match self.messaging.send_public(channel, &Notice::text(role.mention())).await {
            Ok(ping) => {
                log::info!("Role ping sent for {}", role);
                let messaging = Arc::clone(&self.messaging);
                tokio::spawn(async move {
                    tokio::time::sleep(PING_LIFETIME).await;
                    match messaging.delete_message(&ping).await {
                        Ok(()) => log::debug!("Role ping {} deleted", ping.message),
                        Err(PlatformError::Forbidden(e)) => {
                            log::warn!("Cannot delete role ping {} (Manage Messages missing?): {}", ping.message, e)
                        }
                        Err(e) => log::warn!("Failed to delete role ping {}: {}", ping.message, e),
                    }
                });
            }
            Err(e) => {
                log::error!("Failed to send role ping: {}", e);
                self.ops
                    .post(format!("⚠️ **Ping Failed:** Could not ping role {}: {}", role.mention(), e))
                    .await;
            }
        }
    }

    async fn post_public(&self, channel: ChannelId, notice: Notice) {
        if let Err(e) = self.messaging.send_public(channel, &notice).await {
            log::error!("Failed to post to announce channel {}: {}", channel, e);
        }
    }

    fn set_state(&self, state: CycleState) {
        self.controller.lock().set_cycle_state(state);
    }
}

/// First-seen time for an observation made `elapsed` into the window
fn observed_at(round: &AllocationRound, elapsed: Duration) -> chrono::DateTime<Utc> {
    round.opened_at + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
}

/// "Comment" from "comment", "Long Form" from "long form"
fn title_case(label: &str) -> String {
    label
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The announcement for a planned round
pub fn announcement_notice(plan: &RoundPlan) -> Notice {
    let range = plan.task_range;
    let seconds = plan.settings.reaction_window.as_secs();
    let emoji = &plan.settings.selection_emoji;
    let (title, call) = if range.is_single() {
        (
            "❗・Task Available!",
            format!(
                "React with {} within `{} seconds` to claim task **#{}**!",
                emoji, seconds, range.start
            ),
        )
    } else {
        (
            "❗・Tasks Available!",
            format!(
                "React with {} within `{} seconds` to claim tasks **#{}**-**#{}**!",
                emoji, seconds, range.start, range.end
            ),
        )
    };
    let description = if plan.batch.description.is_empty() {
        call
    } else {
        format!("{}\n\n{}", plan.batch.description, call)
    };
    Notice::card(title, description)
        .with_field("Task Type", title_case(&plan.batch.label), true)
        .with_field("People Needed", range.len().to_string(), true)
}

/// Posted when a round closes with nobody eligible
pub fn unclaimed_notice(range: TaskRange, interval_minutes: u64) -> Notice {
    let minutes = format!(
        "{} minute{}",
        interval_minutes,
        if interval_minutes > 1 { "s" } else { "" }
    );
    Notice::card(
        "⚠️ Task Unclaimed",
        "No one claimed the available task(s) within the time limit.",
    )
    .with_field("Details", format!("**{}** received no reactions.", range.label()), false)
    .with_field("Next Step", format!("Reposting in **{}**.", minutes), false)
    .with_footer(format!("Task Bot | {}", Utc::now().format("%d %B %Y")))
    .with_tone(NoticeTone::Warning)
}

/// Public congratulations for the settled winners
pub fn congratulations_notice(settled: &[Settlement]) -> Notice {
    match settled {
        [only] => Notice::text(format!(
            "> 🥇 Congratulations **{}**! You have been assigned Task #{}.",
            only.member.mention(),
            only.task_number
        )),
        many => {
            let mentions: Vec<String> = many.iter().map(|s| s.member.mention()).collect();
            Notice::text(format!("> 🥇 Congratulations to the winners: {}", mentions.join(" ")))
        }
    }
}
