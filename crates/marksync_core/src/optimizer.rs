//! Event optimization: collapse each resource's event chain to the single
//! event a device actually needs to converge.
//!
//! A device that was offline through `create(R)`, `update(R)`, `update(R)`,
//! `delete(R)` only needs the delete. For a surviving resource the winning
//! create/update carries the full current state, so earlier events in the
//! chain are redundant. Events for distinct resources are never merged, and
//! the output preserves the order in which resources first appear in the
//! input.

use crate::event::SyncEvent;
use crate::resolver;
use indexmap::IndexMap;

/// Collapse a batch to one representative event per `resource_id`.
pub fn optimize(events: Vec<SyncEvent>) -> Vec<SyncEvent> {
    let mut groups: IndexMap<String, Vec<SyncEvent>> = IndexMap::new();
    for event in events {
        groups
            .entry(event.resource_id.clone())
            .or_default()
            .push(event);
    }

    groups
        .into_values()
        .filter_map(|mut group| {
            let winner = resolver::resolve_index(&group)?;
            Some(group.swap_remove(winner))
        })
        .collect()
}
