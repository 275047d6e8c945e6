pub mod common;

use common::seed;
use passflow::api;
use reqwest::StatusCode;

#[tokio::test]
#[ignore = "requires a running server and a seeded database"]
async fn creates_waiting_ticket() {
    let client = common::Client::new();

    let ticket = client
        .issue_ticket(seed::SERVICE_ACCOUNT_OPENING, seed::TICKET_TYPE_NORMAL)
        .await
        .unwrap();

    assert!(ticket.number.starts_with("G-"));
    assert_eq!(ticket.service_name, "Account Opening");
    assert_eq!(ticket.status, api::ticket::Status::Waiting);
    assert_eq!(ticket.priority_weight, 1);
    assert_eq!(ticket.counter_id, None);
    assert_eq!(ticket.clerk_id, None);
    assert_eq!(ticket.called_at, None);
    assert_eq!(ticket.finished_at, None);
    assert_eq!(ticket.tags, Vec::<String>::new());
}

#[tokio::test]
#[ignore = "requires a running server and a seeded database"]
async fn copies_priority_weight_from_ticket_type() {
    let client = common::Client::new();

    let ticket = client
        .issue_ticket(
            seed::SERVICE_ACCOUNT_OPENING,
            seed::TICKET_TYPE_PRIORITY,
        )
        .await
        .unwrap();

    assert!(ticket.number.starts_with("P-"));
    assert_eq!(ticket.priority_weight, 10);
}

// NOTE: Should be executed as serial test to avoid conflicts with other
// tests.
#[tokio::test]
#[ignore = "requires a running server and a seeded database"]
async fn numbers_increase_within_a_prefix() {
    let client = common::Client::new();

    let first = client
        .issue_ticket(seed::SERVICE_ACCOUNT_OPENING, seed::TICKET_TYPE_NORMAL)
        .await
        .unwrap();
    let second = client
        .issue_ticket(seed::SERVICE_BILL_PAYMENT, seed::TICKET_TYPE_NORMAL)
        .await
        .unwrap();

    let ordinal = |number: &str| {
        number
            .strip_prefix("G-")
            .unwrap()
            .parse::<u32>()
            .unwrap()
    };
    assert_eq!(ordinal(&second.number), ordinal(&first.number) + 1);
}

#[tokio::test]
#[ignore = "requires a running server and a seeded database"]
async fn rejects_unknown_service() {
    let status = common::Client::new()
        .issue_ticket(0xdead, seed::TICKET_TYPE_NORMAL)
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore = "requires a running server and a seeded database"]
async fn rejects_unknown_ticket_type() {
    let status = common::Client::new()
        .issue_ticket(seed::SERVICE_ACCOUNT_OPENING, 0xdead)
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
