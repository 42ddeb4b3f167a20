//! WinnerSelector - earliest reaction wins

use super::eligibility::Candidate;
use super::round::Winner;

/// Pick up to `count` winners, earliest first-seen timestamp first.
///
/// Candidates without a timestamp sort after all timestamped ones; the sort
/// is stable so ties keep resolver order.
pub fn select_winners(mut candidates: Vec<Candidate>, count: u32) -> Vec<Winner> {
    candidates.sort_by_key(|c| (c.first_seen.is_none(), c.first_seen));
    let winners: Vec<Winner> = candidates
        .into_iter()
        .take(count as usize)
        .map(|c| Winner {
            member: c.member,
            reacted_at: c.first_seen,
        })
        .collect();
    log::info!(
        "Selected {} winner(s): {:?}",
        winners.len(),
        winners.iter().map(|w| w.member.name.as_str()).collect::<Vec<_>>()
    );
    winners
}
