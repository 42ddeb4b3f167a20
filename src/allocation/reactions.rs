//! ReactionBook - first-seen reaction timestamps per open round
//!
//! Observations arrive from two directions: pushed by an event-driven
//! adapter, or polled by the cycle while the window is open. Both go through
//! the same insert-if-absent under one lock, so concurrent duplicates cannot
//! overwrite an earlier timestamp.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::round::RoundId;
use crate::platform::{ReactionEntry, UserId};

type RoundReactions = HashMap<UserId, DateTime<Utc>>;

#[derive(Debug, Clone)]
pub struct ReactionBook {
    selection_emoji: String,
    rounds: Arc<Mutex<HashMap<RoundId, RoundReactions>>>,
}

impl ReactionBook {
    pub fn new(selection_emoji: impl Into<String>) -> Self {
        Self {
            selection_emoji: selection_emoji.into(),
            rounds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn rounds(&self) -> MutexGuard<'_, HashMap<RoundId, RoundReactions>> {
        self.rounds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn selection_emoji(&self) -> &str {
        &self.selection_emoji
    }

    /// Start accepting observations for a round
    pub fn open(&self, round: RoundId) {
        self.rounds().entry(round).or_default();
    }

    /// Record one reaction if it counts; returns true if a new timestamp was stored.
    ///
    /// The platform's own reaction time wins over `at` when the entry has one.
    /// Bot reactions, other emoji and rounds that are not open are ignored.
    pub fn record(&self, round: RoundId, entry: &ReactionEntry, at: DateTime<Utc>) -> bool {
        if entry.is_bot || entry.emoji != self.selection_emoji {
            return false;
        }
        let mut rounds = self.rounds();
        let Some(seen) = rounds.get_mut(&round) else {
            log::debug!("Ignoring reaction from {} on round {} which is not open", entry.user, round);
            return false;
        };
        if seen.contains_key(&entry.user) {
            return false;
        }
        seen.insert(entry.user, entry.reacted_at.unwrap_or(at));
        log::info!("Reaction added by {} on round {}. Storing timestamp.", entry.user, round);
        true
    }

    /// Record a batch of polled reactions; `at` stands in for entries without a time
    pub fn observe(&self, round: RoundId, entries: &[ReactionEntry], at: DateTime<Utc>) -> usize {
        entries.iter().filter(|entry| self.record(round, entry, at)).count()
    }

    pub fn first_seen(&self, round: RoundId, user: UserId) -> Option<DateTime<Utc>> {
        self.rounds().get(&round).and_then(|seen| seen.get(&user).copied())
    }

    /// Copy of everything recorded for a round
    pub fn snapshot(&self, round: RoundId) -> HashMap<UserId, DateTime<Utc>> {
        self.rounds().get(&round).cloned().unwrap_or_default()
    }

    /// Drop a round's records
    pub fn purge(&self, round: RoundId) {
        if self.rounds().remove(&round).is_some() {
            log::debug!("Purged reaction records for round {}", round);
        }
    }

    /// Number of rounds with live records
    pub fn open_rounds(&self) -> usize {
        self.rounds().len()
    }
}
