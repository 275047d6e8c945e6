//! Propagation of "ticket called" events to observers.
//!
//! Two layers. The process performing a claim publishes the event to its
//! own in-memory subscribers through [`Bus`] immediately. Observers in
//! other processes (display screens, other clerk sessions) reconcile by
//! polling the store for the most recently called ticket; [`Poller`]
//! runs that loop and feeds detected events into a [`Bus`] as well.
//! Polling alone is sufficient for correctness, the broadcast only
//! shortcuts its delay.
//!
//! Delivery is at-least-once: the same event may arrive from both
//! layers, or on consecutive poll ticks. [`CallHistory`] absorbs the
//! duplication on the observer side.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{sync::broadcast, task, time::MissedTickBehavior};

use crate::db::{self, counter, ticket};

/// Notification that a specific ticket has been claimed and should be
/// displayed/announced.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub ticket: ticket::Id,
    pub number: String,
    pub counter: Option<counter::Id>,
    #[serde(with = "time::serde::rfc3339")]
    pub called_at: OffsetDateTime,
}

impl CallEvent {
    /// `None` for tickets that were never called.
    pub fn from_ticket(ticket: &db::Ticket) -> Option<Self> {
        Some(Self {
            ticket: ticket.id,
            number: ticket.number.clone(),
            counter: ticket.counter,
            called_at: ticket.called_at?,
        })
    }
}

/// Whether `head` carries a call the observer has not forwarded yet.
/// The same (ticket, called_at) pair re-read on a later poll tick is
/// not a new call; the same ticket with a newer `called_at` (a ticket
/// re-claimed after a queue reset) is.
pub fn is_new_call(last: Option<&CallEvent>, head: &CallEvent) -> bool {
    last.map_or(true, |l| {
        l.ticket != head.ticket || l.called_at != head.called_at
    })
}

/// In-process fan-out of call events. Cheap to clone; publishing with no
/// subscribers is a no-op.
#[derive(Clone)]
pub struct Bus(broadcast::Sender<CallEvent>);

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self(tx)
    }

    pub fn publish(&self, event: CallEvent) {
        drop(self.0.send(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.0.subscribe()
    }
}

/// Background reconciliation loop: re-reads the most recently called
/// ticket on a fixed interval and publishes a [`CallEvent`] whenever it
/// changes. Read failures are logged and retried on the next tick.
///
/// The loop stops deterministically when the `Poller` is dropped or
/// [`stopped`](Poller::stop) explicitly, so a torn-down observer leaks
/// no timer.
pub struct Poller {
    handle: task::JoinHandle<()>,
}

impl Poller {
    pub fn spawn(
        db_client: Arc<db::Client>,
        bus: Bus,
        interval: Duration,
    ) -> Self {
        let handle = task::spawn(async move {
            let mut last: Option<CallEvent> = None;
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticks.tick().await;

                let head = match db_client.get_last_called(1).await {
                    Ok(mut tickets) => tickets.pop(),
                    Err(e) => {
                        tracing::warn!("failed to poll for calls: {e}");
                        continue;
                    }
                };
                let Some(event) =
                    head.as_ref().and_then(CallEvent::from_ticket)
                else {
                    continue;
                };

                if is_new_call(last.as_ref(), &event) {
                    bus.publish(event.clone());
                    last = Some(event);
                }
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Observer-side record of recent calls, as rendered by display screens:
/// newest first, bounded, and idempotent under re-delivery.
#[derive(Debug)]
pub struct CallHistory {
    capacity: usize,
    entries: Vec<CallEvent>,
}

impl CallHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    /// Records a delivered call event.
    ///
    /// An event for a ticket already present replaces the old entry
    /// instead of duplicating it, and entries stay ordered by
    /// `called_at` descending regardless of the order notifications
    /// arrive in.
    pub fn record(&mut self, event: CallEvent) {
        self.entries.retain(|e| e.ticket != event.ticket);
        let at = self
            .entries
            .iter()
            .position(|e| e.called_at < event.called_at)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, event);
        self.entries.truncate(self.capacity);
    }

    /// The most recently called ticket, i.e. the "currently called"
    /// widget content.
    pub fn latest(&self) -> Option<&CallEvent> {
        self.entries.first()
    }

    pub fn entries(&self) -> &[CallEvent] {
        &self.entries
    }
}
