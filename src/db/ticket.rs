use std::error::Error as StdError;

use derive_more::Display;
use enum_utils::TryFromRepr;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, Time};
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Error, Row,
};
use uuid::Uuid;

use super::{counter, service, user, Client};

#[derive(Clone, Debug)]
pub struct Ticket {
    pub id: Id,
    pub number: String,
    pub service: service::Id,
    pub service_name: String,
    pub status: Status,
    pub priority_weight: i32,
    pub counter: Option<counter::Id>,
    pub clerk: Option<user::Id>,
    pub created_at: OffsetDateTime,
    pub called_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

impl Ticket {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            number: row.get("number"),
            service: row.get("service_id"),
            service_name: row.get("service_name"),
            status: row.get("status"),
            priority_weight: row.get("priority_weight"),
            counter: row.get("counter_id"),
            clerk: row.get("clerk_id"),
            created_at: row.get("created_at"),
            called_at: row.get("called_at"),
            finished_at: row.get("finished_at"),
            notes: row.get("notes"),
            tags: split_tags(row.get("tags")),
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, PartialEq,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Id(Uuid::new_v4())
    }
}

impl From<u128> for Id {
    fn from(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl FromSql<'_> for Id {
    accepts!(UUID);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Uuid::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for Id {
    accepts!(UUID);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, TryFromRepr, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Status {
    /// Issued and queued, not yet claimed by any clerk.
    Waiting = 1,

    /// Claimed by a clerk. `called_at`, `counter_id` and `clerk_id` are
    /// set at the moment of the claim.
    InProgress = 2,

    /// Completed by the serving clerk, `finished_at` is set.
    Finished = 3,

    /// Cancelled by an administrative queue reset. `finished_at` stays
    /// unset: cancellation is not completion.
    Cancelled = 4,
}

impl Status {
    /// Whether a ticket in this state may be claimed by a clerk.
    pub fn claimable(self) -> bool {
        self == Self::Waiting
    }

    /// Whether a ticket in this state may be finalized.
    pub fn finalizable(self) -> bool {
        self == Self::InProgress
    }

    /// Whether the ticket still occupies the queue (and so is swept by an
    /// administrative reset).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::InProgress)
    }
}

impl FromSql<'_> for Status {
    accepts!(INT2);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from_sql(ty, raw)?;
        let repr = u8::try_from(repr)?;
        let status = Self::try_from(repr).map_err(|_| "invalid status")?;
        Ok(status)
    }
}

impl ToSql for Status {
    accepts!(INT2);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from((*self) as u8);
        repr.to_sql(ty, out)
    }
}

/// Formats a human-facing ticket number from its type prefix and the
/// ordinal within the current (prefix, day) scope.
///
/// Ordinals are zero-padded to 3 digits and widen naturally past 999.
pub fn format_number(prefix: &str, ordinal: u32) -> String {
    format!("{prefix}-{ordinal:03}")
}

/// Start of the UTC calendar day containing `at`. The allocation scope
/// and all metric day-groupings share this boundary.
pub fn start_of_day(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_time(Time::MIDNIGHT)
}

fn split_tags(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn join_tags(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(","))
    }
}

const TICKET_COLUMNS: &str = "\
    id, number, service_id, service_name, status, priority_weight, \
    counter_id, clerk_id, created_at, called_at, finished_at, notes, tags";

impl Client {
    /// Draws the next number for `prefix` within the calendar day of
    /// `now`.
    ///
    /// The per-(prefix, day) counter row is bumped with a single upsert,
    /// so two concurrent issuances can never observe the same ordinal.
    /// The scope resets naturally at midnight because the key carries
    /// the day.
    pub async fn allocate_number(
        &self,
        prefix: &str,
        now: OffsetDateTime,
    ) -> Result<String, Error> {
        const SQL: &str = "\
            INSERT INTO ticket_counters (prefix, day, value) \
            VALUES ($1, $2, 1) \
            ON CONFLICT (prefix, day) DO UPDATE \
            SET value = ticket_counters.value + 1 \
            RETURNING value";

        let ordinal = self
            .0
            .query_one(SQL, &[&prefix, &now.date()])
            .await?
            .get::<_, i32>("value");

        Ok(format_number(prefix, u32::try_from(ordinal).unwrap()))
    }

    pub async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), Error> {
        const SQL: &str = "\
            INSERT INTO tickets (id, number, service_id, service_name, \
                                 status, priority_weight, counter_id, \
                                 clerk_id, created_at, called_at, \
                                 finished_at, notes, tags) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)";

        self.0
            .execute(
                SQL,
                &[
                    &ticket.id,
                    &ticket.number,
                    &ticket.service,
                    &ticket.service_name,
                    &ticket.status,
                    &ticket.priority_weight,
                    &ticket.counter,
                    &ticket.clerk,
                    &ticket.created_at,
                    &ticket.called_at,
                    &ticket.finished_at,
                    &ticket.notes,
                    &join_tags(&ticket.tags),
                ],
            )
            .await
            .map(drop)
    }

    pub async fn get_ticket_by_id(
        &self,
        id: Id,
    ) -> Result<Option<Ticket>, Error> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"
        );
        Ok(self
            .0
            .query_opt(sql.as_str(), &[&id])
            .await?
            .map(|row| Ticket::from_row(&row)))
    }

    pub async fn get_waiting_tickets(&self) -> Result<Vec<Ticket>, Error> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE status = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        Ok(self
            .0
            .query(sql.as_str(), &[&Status::Waiting])
            .await?
            .iter()
            .map(Ticket::from_row)
            .collect())
    }

    pub async fn get_waiting_count(&self) -> Result<usize, Error> {
        const SQL: &str = "SELECT COUNT(*) FROM tickets WHERE status = $1";
        Ok(self
            .0
            .query_one(SQL, &[&Status::Waiting])
            .await?
            .get::<_, i64>(0)
            .try_into()
            .unwrap())
    }

    pub async fn get_in_progress_tickets(
        &self,
    ) -> Result<Vec<Ticket>, Error> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE status = $1"
        );
        Ok(self
            .0
            .query(sql.as_str(), &[&Status::InProgress])
            .await?
            .iter()
            .map(Ticket::from_row)
            .collect())
    }

    /// The ticket the clerk is serving right now, if any. The state
    /// machine allows at most one.
    pub async fn get_active_ticket_by_clerk(
        &self,
        clerk: user::Id,
    ) -> Result<Option<Ticket>, Error> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE clerk_id = $1 AND status = $2 \
             LIMIT 1"
        );
        Ok(self
            .0
            .query_opt(sql.as_str(), &[&clerk, &Status::InProgress])
            .await?
            .map(|row| Ticket::from_row(&row)))
    }

    /// Conditionally transitions a ticket from `waiting` to
    /// `in-progress`, stamping `called_at` and recording where and by
    /// whom it is served.
    ///
    /// Returns `false` when the ticket was no longer `waiting` at the
    /// moment of the update, i.e. someone else claimed it first. The
    /// caller re-runs selection in that case instead of trusting its
    /// (stale) snapshot.
    pub async fn claim_ticket(
        &self,
        id: Id,
        counter: counter::Id,
        clerk: user::Id,
        called_at: OffsetDateTime,
    ) -> Result<bool, Error> {
        const SQL: &str = "\
            UPDATE tickets \
            SET status = $2, counter_id = $3, clerk_id = $4, called_at = $5 \
            WHERE id = $1 AND status = $6";

        let updated = self
            .0
            .execute(
                SQL,
                &[
                    &id,
                    &Status::InProgress,
                    &counter,
                    &clerk,
                    &called_at,
                    &Status::Waiting,
                ],
            )
            .await?;

        Ok(updated == 1)
    }

    /// Conditionally transitions a ticket from `in-progress` to
    /// `finished`, stamping `finished_at` and storing the finalization
    /// payload. Returns `false` when the ticket was not `in-progress`.
    pub async fn finalize_ticket(
        &self,
        id: Id,
        notes: &str,
        tags: &[String],
        finished_at: OffsetDateTime,
    ) -> Result<bool, Error> {
        const SQL: &str = "\
            UPDATE tickets \
            SET status = $2, notes = $3, tags = $4, finished_at = $5 \
            WHERE id = $1 AND status = $6";

        let updated = self
            .0
            .execute(
                SQL,
                &[
                    &id,
                    &Status::Finished,
                    &notes,
                    &join_tags(tags),
                    &finished_at,
                    &Status::InProgress,
                ],
            )
            .await?;

        Ok(updated == 1)
    }

    /// Administrative queue reset: cancels every `waiting` and
    /// `in-progress` ticket in one sweep. `finished_at` is left unset.
    pub async fn cancel_active_tickets(&self) -> Result<u64, Error> {
        const SQL: &str = "\
            UPDATE tickets \
            SET status = $1 \
            WHERE status = $2 OR status = $3";

        self.0
            .execute(
                SQL,
                &[&Status::Cancelled, &Status::Waiting, &Status::InProgress],
            )
            .await
    }

    /// Most recently called tickets, newest first. Observers poll this
    /// to reconcile call events across processes.
    pub async fn get_last_called(
        &self,
        limit: usize,
    ) -> Result<Vec<Ticket>, Error> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE called_at IS NOT NULL \
             ORDER BY called_at DESC, id DESC \
             LIMIT $1"
        );
        let limit = i64::try_from(limit).unwrap();
        Ok(self
            .0
            .query(sql.as_str(), &[&limit])
            .await?
            .iter()
            .map(Ticket::from_row)
            .collect())
    }

    pub async fn get_tickets_created_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Ticket>, Error> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE created_at >= $1 AND created_at <= $2 \
             ORDER BY created_at ASC"
        );
        Ok(self
            .0
            .query(sql.as_str(), &[&from, &to])
            .await?
            .iter()
            .map(Ticket::from_row)
            .collect())
    }

    pub async fn get_tickets_finished_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Ticket>, Error> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE status = $1 \
               AND finished_at >= $2 AND finished_at <= $3 \
             ORDER BY finished_at DESC"
        );
        Ok(self
            .0
            .query(sql.as_str(), &[&Status::Finished, &from, &to])
            .await?
            .iter()
            .map(Ticket::from_row)
            .collect())
    }
}
