//! Allocation Core - timed task giveaway rounds
//!
//! This module provides:
//! - The controller holding settings, counters and control flags
//! - The cycle that announces, waits, resolves and settles each round
//! - Reaction bookkeeping, eligibility and winner selection
//! - Settlement: cooldown roles, winner notices and the ledger

pub mod controller;
pub mod cycle;
pub mod eligibility;
pub mod ledger;
pub mod notify;
pub mod reactions;
pub mod roles;
pub mod round;
pub mod selector;
pub mod settlement;

pub use controller::{
    AllocationController, Batch, BatchRequest, ControlFlags, CycleState, NextAction, RoundPlan, Settings, SettingsOverride,
    SharedController, TaskCounterState,
};
pub use cycle::{AllocationCycle, LoopSignals, RoundSummary, SkipReason, TickOutcome};
pub use eligibility::{Candidate, EligibilityResolver};
pub use ledger::{LedgerOutcome, LedgerWriter};
pub use notify::{Delivery, NotificationDispatcher, OpsLog};
pub use reactions::ReactionBook;
pub use roles::{RevocationOutcome, RoleGrant, RoleLifecycleManager};
pub use round::{AllocationRound, RoundId, TaskRange, Winner};
pub use selector::select_winners;
pub use settlement::{Settlement, SettlementFailure, Settler};
