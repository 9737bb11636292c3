//! Conflict resolution for concurrent events on a single resource.
//!
//! When several devices mutate the same resource, exactly one event must
//! win, and every server instance must pick the same one regardless of
//! arrival order. Precedence, highest first:
//!
//! 1. Higher `timestamp`.
//! 2. On an exact timestamp tie, `delete` beats any non-delete action, so a
//!    deleted resource cannot be resurrected by a concurrent edit.
//! 3. Remaining ties go to the later log insertion (larger id).
//!
//! The ordering is total, so resolution never fails for a non-empty input.

use crate::event::SyncEvent;
use std::cmp::Ordering;

/// Compare two events by conflict precedence. `Greater` means `a` wins.
pub fn precedence(a: &SyncEvent, b: &SyncEvent) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.is_delete().cmp(&b.is_delete()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Pick the authoritative event among events sharing one `resource_id`.
/// Returns `None` only for an empty slice.
pub fn resolve(events: &[SyncEvent]) -> Option<&SyncEvent> {
    resolve_index(events).map(|i| &events[i])
}

/// Index of the winning event within the slice.
pub fn resolve_index(events: &[SyncEvent]) -> Option<usize> {
    let mut winner: Option<usize> = None;
    for (i, event) in events.iter().enumerate() {
        winner = match winner {
            None => Some(i),
            Some(w) if precedence(event, &events[w]) == Ordering::Greater => Some(i),
            Some(w) => Some(w),
        };
    }
    winner
}
