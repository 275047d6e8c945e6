//! Selection of the next ticket to call for a counter.
//!
//! Selection is a pure function over a snapshot of the waiting set: it
//! never mutates state, so the snapshot may be stale by the time the
//! claim is attempted. The claim itself re-validates the ticket's status
//! in a conditional update (`db::Client::claim_ticket`), and the caller
//! re-runs selection when that update reports the ticket gone.

use std::{cmp::Reverse, collections::HashSet};

use crate::db::{service, Service, Ticket};

/// The set of service ids a counter is capable of serving, derived from
/// its assigned categories.
pub fn servable_set(services: &[Service]) -> HashSet<service::Id> {
    services.iter().map(|s| s.id).collect()
}

/// Picks the next ticket a counter should call.
///
/// Tickets outside the counter's capability set are skipped. Among the
/// eligible, a higher `priority_weight` always wins; equal weights are
/// served strictly first-come-first-served by `created_at`. Returns
/// `None` when nothing eligible is waiting (an empty queue and a
/// capability mismatch look the same to the caller).
pub fn select_next<'t>(
    waiting: &'t [Ticket],
    servable: &HashSet<service::Id>,
) -> Option<&'t Ticket> {
    waiting
        .iter()
        .filter(|t| t.status.claimable() && servable.contains(&t.service))
        .min_by_key(|t| (Reverse(t.priority_weight), t.created_at))
}
