use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db;

pub use crate::db::ticket::{Id, Status};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Id,
    pub number: String,
    pub service_id: db::service::Id,
    pub service_name: String,
    pub status: Status,
    pub priority_weight: i32,
    pub counter_id: Option<db::counter::Id>,
    pub clerk_id: Option<db::user::Id>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub called_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

impl From<db::Ticket> for Ticket {
    fn from(ticket: db::Ticket) -> Self {
        Self {
            id: ticket.id,
            number: ticket.number,
            service_id: ticket.service,
            service_name: ticket.service_name,
            status: ticket.status,
            priority_weight: ticket.priority_weight,
            counter_id: ticket.counter,
            clerk_id: ticket.clerk,
            created_at: ticket.created_at,
            called_at: ticket.called_at,
            finished_at: ticket.finished_at,
            notes: ticket.notes,
            tags: ticket.tags,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub tickets: Vec<Ticket>,
    pub total_count: usize,
}
