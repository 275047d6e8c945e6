//! Read-side statistics derived from stored lifecycle timestamps.
//!
//! Everything here is a pure computation over rows the caller already
//! read from the store; nothing holds independent state. Durations that
//! are undefined for a ticket (it never reached the relevant state)
//! are `None` — "not applicable" — never zero.

use std::collections::HashMap;

use itertools::Itertools as _;
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime};

use crate::db::{user, Ticket, User};

/// Time the visitor spent in the queue: `called_at - created_at`.
/// Undefined while the ticket is still waiting.
pub fn wait_time(ticket: &Ticket) -> Option<Duration> {
    let called_at = ticket.called_at?;
    Some((called_at - ticket.created_at).max(Duration::ZERO))
}

/// Time the clerk spent serving: `finished_at - called_at`. Only
/// defined for tickets that reached `finished`.
pub fn service_time(ticket: &Ticket) -> Option<Duration> {
    let finished_at = ticket.finished_at?;
    let called_at = ticket.called_at?;
    Some((finished_at - called_at).max(Duration::ZERO))
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tickets_today: usize,
    pub waiting_now: usize,
    /// `None` when no ticket finished today.
    pub avg_wait_time_seconds: Option<f64>,
    pub avg_service_time_seconds: Option<f64>,
    pub top_services: Vec<ServiceCount>,
    /// Issuance counts per calendar day, oldest day first, today last.
    pub tickets_per_day: Vec<DayCount>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCount {
    pub name: String,
    pub count: usize,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCount {
    pub date: Date,
    pub count: usize,
}

const TOP_SERVICES: usize = 5;

/// Builds the dashboard snapshot from the tickets created during the
/// trailing `days`-day window (today included) and the current waiting
/// count.
///
/// Days are grouped by the UTC calendar-day convention the number
/// allocator uses, so a dashboard "day" and a numbering scope always
/// agree.
pub fn snapshot(
    window: &[Ticket],
    waiting_now: usize,
    now: OffsetDateTime,
    days: u16,
) -> Snapshot {
    let today = now.date();

    let today_tickets = window
        .iter()
        .filter(|t| t.created_at.date() == today)
        .collect::<Vec<_>>();

    let avg_wait_time_seconds =
        average_seconds(today_tickets.iter().copied().filter_map(wait_time));
    let avg_service_time_seconds = average_seconds(
        today_tickets.iter().copied().filter_map(service_time),
    );

    let top_services = today_tickets
        .iter()
        .counts_by(|t| t.service_name.as_str())
        .into_iter()
        .sorted_by(|(a_name, a_count), (b_name, b_count)| {
            b_count.cmp(a_count).then_with(|| a_name.cmp(b_name))
        })
        .take(TOP_SERVICES)
        .map(|(name, count)| ServiceCount {
            name: name.to_string(),
            count,
        })
        .collect();

    let tickets_per_day = (0..i64::from(days))
        .rev()
        .map(|back| {
            let date = today - Duration::days(back);
            DayCount {
                date,
                count: window
                    .iter()
                    .filter(|t| t.created_at.date() == date)
                    .count(),
            }
        })
        .collect();

    Snapshot {
        tickets_today: today_tickets.len(),
        waiting_now,
        avg_wait_time_seconds,
        avg_service_time_seconds,
        top_services,
        tickets_per_day,
    }
}

fn average_seconds(durations: impl Iterator<Item = Duration>) -> Option<f64> {
    let mut total = Duration::ZERO;
    let mut count = 0u32;
    for d in durations {
        total += d;
        count += 1;
    }
    (count > 0).then(|| total.as_seconds_f64() / f64::from(count))
}

/// Per-clerk throughput over a set of finished tickets.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClerkPerformance {
    pub clerk_id: user::Id,
    pub clerk_name: String,
    pub total_finished: usize,
    pub avg_service_time_seconds: Option<f64>,
}

pub fn clerk_performance(
    finished: &[Ticket],
    users: &HashMap<user::Id, User>,
) -> Vec<ClerkPerformance> {
    finished
        .iter()
        .filter_map(|t| Some((t.clerk?, t)))
        .into_group_map()
        .into_iter()
        .filter_map(|(clerk_id, tickets)| {
            let user = users.get(&clerk_id)?;
            Some(ClerkPerformance {
                clerk_id,
                clerk_name: user.name.clone(),
                total_finished: tickets.len(),
                avg_service_time_seconds: average_seconds(
                    tickets.iter().copied().filter_map(service_time),
                ),
            })
        })
        .sorted_by(|a, b| {
            b.total_finished
                .cmp(&a.total_finished)
                .then_with(|| a.clerk_name.cmp(&b.clerk_name))
        })
        .collect()
}

/// What a clerk is doing right now, derived rather than stored: a clerk
/// is serving iff they hold an `in-progress` ticket, otherwise free —
/// unless they set themselves `away`, which takes precedence in display
/// regardless of ticket state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClerkActivity {
    Serving,
    Free,
    Away,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveClerkState {
    pub clerk_id: user::Id,
    pub clerk_name: String,
    pub activity: ClerkActivity,
    pub availability_message: Option<String>,
    pub ticket_number: Option<String>,
    pub service_name: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub called_at: Option<OffsetDateTime>,
}

pub fn live_clerk_states(
    attending: &[User],
    in_progress: &[Ticket],
) -> Vec<LiveClerkState> {
    attending
        .iter()
        .map(|user| {
            let ticket = in_progress
                .iter()
                .find(|t| t.clerk == Some(user.id));

            let activity = if user.availability == user::Availability::Away {
                ClerkActivity::Away
            } else if ticket.is_some() {
                ClerkActivity::Serving
            } else {
                ClerkActivity::Free
            };

            LiveClerkState {
                clerk_id: user.id,
                clerk_name: user.name.clone(),
                activity,
                availability_message: user.availability_message.clone(),
                ticket_number: ticket.map(|t| t.number.clone()),
                service_name: ticket.map(|t| t.service_name.clone()),
                called_at: ticket.and_then(|t| t.called_at),
            }
        })
        .collect()
}
