use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Error,
};
use uuid::Uuid;

use super::Client;

/// How a visitor is classified at issuance (normal vs. priority-by-law),
/// as opposed to what service they need.
///
/// The `priority_weight` is copied onto the ticket when it is issued, so
/// later changes to the type never retroactively reorder the queue.
#[derive(Clone, Debug)]
pub struct TicketType {
    pub id: Id,
    pub name: String,
    pub description: String,
    /// Single-character code embedded in ticket numbers ("G-007").
    pub prefix: String,
    pub priority_weight: i32,
    pub icon: String,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
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

impl Client {
    pub async fn get_ticket_type_by_id(
        &self,
        id: Id,
    ) -> Result<Option<TicketType>, Error> {
        const SQL: &str =
            "SELECT id, name, description, prefix, priority_weight, icon \
             FROM ticket_types \
             WHERE id = $1";
        Ok(self.0.query_opt(SQL, &[&id]).await?.map(|row| TicketType {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            prefix: row.get("prefix"),
            priority_weight: row.get("priority_weight"),
            icon: row.get("icon"),
        }))
    }
}
