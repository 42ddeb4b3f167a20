//! Round records
//!
//! An AllocationRound covers one announce-wait-resolve pass over a contiguous
//! range of task numbers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::{Member, MessageHandle, UserId};

/// Identity of a round, derived from its announcement message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl From<&MessageHandle> for RoundId {
    fn from(handle: &MessageHandle) -> Self {
        RoundId(handle.message.0)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive range of 1-based task numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRange {
    pub start: u32,
    pub end: u32,
}

impl TaskRange {
    /// Range of `count` tasks starting at `start`; `count` must be at least 1
    pub fn new(start: u32, count: u32) -> Self {
        Self {
            start,
            end: start.saturating_add(count.saturating_sub(1)),
        }
    }

    pub fn len(&self) -> u32 {
        (self.end - self.start).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// "Task #3" or "Tasks #3-#4"
    pub fn label(&self) -> String {
        if self.is_single() {
            format!("Task #{}", self.start)
        } else {
            format!("Tasks #{}-#{}", self.start, self.end)
        }
    }
}

impl fmt::Display for TaskRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "#{}", self.start)
        } else {
            write!(f, "#{}-#{}", self.start, self.end)
        }
    }
}

/// The single open round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRound {
    pub round_id: RoundId,
    pub announcement: MessageHandle,
    pub task_range: TaskRange,
    pub winners_needed: u32,
    pub opened_at: DateTime<Utc>,
    pub reaction_window: Duration,
    /// Batch generation the round was opened under
    pub generation: u64,
}

impl AllocationRound {
    pub fn open(announcement: MessageHandle, task_range: TaskRange, reaction_window: Duration, generation: u64) -> Self {
        Self {
            round_id: RoundId::from(&announcement),
            announcement,
            task_range,
            winners_needed: task_range.len(),
            opened_at: Utc::now(),
            reaction_window,
            generation,
        }
    }

    pub fn reaction_window_seconds(&self) -> u64 {
        self.reaction_window.as_secs()
    }
}

/// An eligible candidate chosen for a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    pub member: Member,
    /// First-seen reaction time; `None` if the reaction was never observed in the window
    pub reacted_at: Option<DateTime<Utc>>,
}

impl Winner {
    pub fn id(&self) -> UserId {
        self.member.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ChannelId, MessageId};

    #[test]
    fn test_task_range_single() {
        let range = TaskRange::new(3, 1);
        assert_eq!(range.len(), 1);
        assert!(range.is_single());
        assert_eq!(range.to_string(), "#3");
        assert_eq!(range.label(), "Task #3");
    }

    #[test]
    fn test_task_range_multi() {
        let range = TaskRange::new(2, 2);
        assert_eq!(range.end, 3);
        assert_eq!(range.len(), 2);
        assert_eq!(range.to_string(), "#2-#3");
        assert_eq!(range.label(), "Tasks #2-#3");
    }

    #[test]
    fn test_round_id_from_announcement() {
        let handle = MessageHandle {
            channel: ChannelId(1),
            message: MessageId(77),
        };
        let round = AllocationRound::open(handle, TaskRange::new(1, 2), Duration::from_secs(10), 1);
        assert_eq!(round.round_id, RoundId(77));
        assert_eq!(round.winners_needed, 2);
        assert_eq!(round.reaction_window_seconds(), 10);
    }
}
