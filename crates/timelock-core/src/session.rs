//! Per-entry countdown state machine
//!
//! Everything here is a pure function of an entry and a wall-clock instant.
//! Remaining time is always derived from state-entry timestamps, never from
//! how many ticks happened, so a process that was suspended for an hour
//! computes the same result as one that ticked every second.

use chrono::{DateTime, Local};
use timelock_api::{AppEntry, AppState};
use timelock_util::{checked_add_secs, elapsed_secs, PackageId};

/// One state change applied by [`tick_to_now`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub package_id: PackageId,
    pub from_state: AppState,
    pub to_state: AppState,
    /// Instant the timer reached zero (not the instant it was observed)
    pub at: DateTime<Local>,
}

/// Result of advancing one entry to `now`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub entry: AppEntry,
    /// Transitions in the order they happened; at most Active -> Locked -> Unselected
    pub transitions: Vec<Transition>,
}

impl TickOutcome {
    pub fn changed_state(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// Recompute `remaining_seconds` and apply every transition due by `now`.
///
/// Rules:
/// - Active: remaining = budget - elapsed. At zero the entry locks at
///   `cycle_started_at + budget` and the lock is evaluated from that instant.
/// - Locked: remaining = lock duration - elapsed since `locked_at`. At zero
///   the entry returns to Unselected with timestamps cleared.
/// - A clock that moved backwards counts as no time passed.
/// - Missing timestamps fail closed: an Active entry without a start locks
///   now; a Locked entry without `locked_at` starts its lock now.
/// - Pending and Unselected entries are returned unchanged.
pub fn tick_to_now(entry: &AppEntry, now: DateTime<Local>) -> TickOutcome {
    let mut next = entry.clone();
    let mut transitions = Vec::new();

    if next.state == AppState::Active {
        let expired_at = match next.cycle_started_at {
            Some(started) => {
                let elapsed = elapsed_secs(started, now);
                if elapsed < next.access_budget_seconds {
                    next.remaining_seconds = next.access_budget_seconds - elapsed;
                    return TickOutcome {
                        entry: next,
                        transitions,
                    };
                }
                checked_add_secs(started, next.access_budget_seconds).unwrap_or(now)
            }
            None => {
                next.cycle_started_at = Some(now);
                now
            }
        };

        next.state = AppState::Locked;
        next.locked_at = Some(expired_at);
        next.remaining_seconds = next.lock_duration_seconds;
        transitions.push(Transition {
            package_id: next.package_id.clone(),
            from_state: AppState::Active,
            to_state: AppState::Locked,
            at: expired_at,
        });
    }

    if next.state == AppState::Locked {
        let locked_at = *next.locked_at.get_or_insert(now);
        next.cycle_started_at.get_or_insert(locked_at);

        let elapsed = elapsed_secs(locked_at, now);
        if elapsed < next.lock_duration_seconds {
            next.remaining_seconds = next.lock_duration_seconds - elapsed;
            return TickOutcome {
                entry: next,
                transitions,
            };
        }

        let released_at = checked_add_secs(locked_at, next.lock_duration_seconds).unwrap_or(now);
        next.state = AppState::Unselected;
        next.remaining_seconds = 0;
        next.cycle_started_at = None;
        next.locked_at = None;
        transitions.push(Transition {
            package_id: next.package_id.clone(),
            from_state: AppState::Locked,
            to_state: AppState::Unselected,
            at: released_at,
        });
    }

    TickOutcome {
        entry: next,
        transitions,
    }
}

/// Seconds of access consumed by an Active entry at `now`, capped at its budget
pub fn access_used(entry: &AppEntry, now: DateTime<Local>) -> u64 {
    match (entry.state, entry.cycle_started_at) {
        (AppState::Active, Some(started)) => {
            elapsed_secs(started, now).min(entry.access_budget_seconds)
        }
        _ => 0,
    }
}
