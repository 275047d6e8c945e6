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

use super::{category, Client};

/// A physical service point operated by a clerk. A counter with an empty
/// assignment set can never be dispatched a ticket.
#[derive(Clone, Debug)]
pub struct Counter {
    pub id: Id,
    pub name: String,
    pub assigned_categories: Vec<category::Id>,
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
    pub async fn get_counter_by_id(
        &self,
        id: Id,
    ) -> Result<Option<Counter>, Error> {
        const SQL: &str = "\
            SELECT c.id, c.name, \
                   ARRAY(SELECT cc.category_id \
                         FROM counter_categories cc \
                         WHERE cc.counter_id = c.id) AS assigned_categories \
            FROM counters c \
            WHERE c.id = $1";
        Ok(self.0.query_opt(SQL, &[&id]).await?.map(|row| Counter {
            id: row.get("id"),
            name: row.get("name"),
            assigned_categories: row.get("assigned_categories"),
        }))
    }
}
