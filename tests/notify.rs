use passflow::{
    db::{counter, service, ticket, Ticket},
    notify::{is_new_call, CallEvent, CallHistory},
};
use time::{Duration, OffsetDateTime};

fn at(minutes: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::minutes(minutes)
}

fn event(ticket: u128, minutes: i64) -> CallEvent {
    CallEvent {
        ticket: ticket::Id::from(ticket),
        number: format!("G-{ticket:03}"),
        counter: Some(counter::Id::from(1)),
        called_at: at(minutes),
    }
}

#[test]
fn redelivered_event_is_recorded_once() {
    let mut history = CallHistory::new(10);

    history.record(event(1, 5));
    history.record(event(1, 5));

    assert_eq!(history.entries().len(), 1);
    assert_eq!(history.latest().unwrap().ticket, ticket::Id::from(1));
}

#[test]
fn recall_of_the_same_ticket_does_not_duplicate_history() {
    let mut history = CallHistory::new(10);

    history.record(event(1, 5));
    history.record(event(2, 6));
    // The display re-receives ticket 1 via the polling fallback.
    history.record(event(1, 5));

    assert_eq!(history.entries().len(), 2);
}

#[test]
fn entries_are_ordered_by_called_at_descending() {
    let mut history = CallHistory::new(10);

    // Out-of-order arrival: polling may deliver an older call after a
    // newer one was already pushed through the broadcast.
    history.record(event(2, 20));
    history.record(event(1, 10));
    history.record(event(3, 30));

    let numbers = history
        .entries()
        .iter()
        .map(|e| e.ticket)
        .collect::<Vec<_>>();
    assert_eq!(
        numbers,
        [
            ticket::Id::from(3),
            ticket::Id::from(2),
            ticket::Id::from(1),
        ]
    );
    assert_eq!(history.latest().unwrap().ticket, ticket::Id::from(3));
}

#[test]
fn history_is_bounded() {
    let mut history = CallHistory::new(3);

    for i in 1..=5 {
        history.record(event(i, i as i64));
    }

    assert_eq!(history.entries().len(), 3);
    // The oldest calls fall off.
    assert_eq!(history.latest().unwrap().ticket, ticket::Id::from(5));
    assert!(history
        .entries()
        .iter()
        .all(|e| e.ticket != ticket::Id::from(1)));
}

#[test]
fn a_reclaimed_ticket_supersedes_its_old_entry() {
    let mut history = CallHistory::new(10);

    history.record(event(1, 5));
    // Same ticket called again later (e.g. re-queued after a reset).
    history.record(event(1, 50));

    assert_eq!(history.entries().len(), 1);
    assert_eq!(history.latest().unwrap().called_at, at(50));
}

#[test]
fn poll_diff_treats_same_pair_as_already_seen() {
    let head = event(1, 5);

    assert!(is_new_call(None, &head));
    assert!(!is_new_call(Some(&event(1, 5)), &head));
    assert!(is_new_call(Some(&event(1, 5)), &event(1, 6)));
    assert!(is_new_call(Some(&event(1, 5)), &event(2, 5)));
}

#[test]
fn never_called_tickets_produce_no_event() {
    let ticket = Ticket {
        id: ticket::Id::from(1),
        number: "G-001".to_string(),
        service: service::Id::from(1),
        service_name: "Account Opening".to_string(),
        status: ticket::Status::Waiting,
        priority_weight: 1,
        counter: None,
        clerk: None,
        created_at: at(0),
        called_at: None,
        finished_at: None,
        notes: None,
        tags: Vec::new(),
    };

    assert!(CallEvent::from_ticket(&ticket).is_none());
}
