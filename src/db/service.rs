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

use super::{category, counter, Client};

#[derive(Clone, Debug)]
pub struct Service {
    pub id: Id,
    pub name: String,
    pub category: category::Id,
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
    pub async fn get_service_by_id(
        &self,
        id: Id,
    ) -> Result<Option<Service>, Error> {
        const SQL: &str = "SELECT id, name, category_id, icon \
                           FROM services \
                           WHERE id = $1";
        Ok(self.0.query_opt(SQL, &[&id]).await?.map(|row| Service {
            id: row.get("id"),
            name: row.get("name"),
            category: row.get("category_id"),
            icon: row.get("icon"),
        }))
    }

    /// Every service the counter is capable of serving: the services
    /// whose category is in the counter's assigned-category set.
    pub async fn get_services_for_counter(
        &self,
        counter: counter::Id,
    ) -> Result<Vec<Service>, Error> {
        const SQL: &str = "\
            SELECT s.id, s.name, s.category_id, s.icon \
            FROM services s \
            JOIN counter_categories cc ON s.category_id = cc.category_id \
            WHERE cc.counter_id = $1";
        Ok(self
            .0
            .query(SQL, &[&counter])
            .await?
            .into_iter()
            .map(|row| Service {
                id: row.get("id"),
                name: row.get("name"),
                category: row.get("category_id"),
                icon: row.get("icon"),
            })
            .collect())
    }
}
