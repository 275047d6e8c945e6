use std::{collections::HashMap, error::Error as StdError};

use enum_utils::TryFromRepr;
use serde::{Deserialize, Serialize};
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Error, Row,
};
use uuid::Uuid;

use super::{counter, Client};

#[derive(Clone, Debug)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub login: String,
    pub password_hash: PasswordHash,
    pub role: Role,
    /// Clerks must be assigned a counter to claim tickets.
    pub counter: Option<counter::Id>,
    pub availability: Availability,
    pub availability_message: Option<String>,
}

impl User {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            login: row.get("login"),
            password_hash: row.get("password_hash"),
            role: row.get("role"),
            counter: row.get("counter_id"),
            availability: row.get("availability"),
            availability_message: row.get("availability_message"),
        }
    }
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

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, TryFromRepr, PartialEq, Serialize,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin = 1,
    Clerk = 2,
}

impl FromSql<'_> for Role {
    accepts!(INT2);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from_sql(ty, raw)?;
        let repr = u8::try_from(repr)?;
        let role = Self::try_from(repr).map_err(|_| "invalid role")?;
        Ok(role)
    }
}

impl ToSql for Role {
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

/// Whether the clerk accepts dispatch, independent of whether they are
/// actively serving a ticket right now.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, TryFromRepr, PartialEq, Serialize,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Online = 1,
    Away = 2,
}

impl FromSql<'_> for Availability {
    accepts!(INT2);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from_sql(ty, raw)?;
        let repr = u8::try_from(repr)?;
        let availability =
            Self::try_from(repr).map_err(|_| "invalid availability")?;
        Ok(availability)
    }
}

impl ToSql for Availability {
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

#[derive(Clone, Debug, PartialEq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(secret: &str) -> Self {
        // TODO: Use real hash function.
        Self(secret.to_string())
    }
}

impl FromSql<'_> for PasswordHash {
    accepts!(TEXT);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        String::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for PasswordHash {
    accepts!(TEXT);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

const USER_COLUMNS: &str = "\
    id, name, login, password_hash, role, counter_id, availability, \
    availability_message";

impl Client {
    pub async fn get_user_by_login(
        &self,
        login: &str,
    ) -> Result<Option<User>, Error> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE login = $1 LIMIT 1"
        );
        Ok(self
            .0
            .query_opt(sql.as_str(), &[&login])
            .await?
            .map(|row| User::from_row(&row)))
    }

    pub async fn get_user_by_id(&self, id: Id) -> Result<Option<User>, Error> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 LIMIT 1"
        );
        Ok(self
            .0
            .query_opt(sql.as_str(), &[&id])
            .await?
            .map(|row| User::from_row(&row)))
    }

    pub async fn get_users_by_ids(
        &self,
        ids: &[Id],
    ) -> Result<HashMap<Id, User>, Error> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE id IN (SELECT unnest($1::UUID[])) \
             LIMIT $2"
        );

        let limit = i64::try_from(ids.len()).unwrap();

        Ok(self
            .0
            .query(sql.as_str(), &[&ids, &limit])
            .await?
            .into_iter()
            .map(|row| {
                let user = User::from_row(&row);
                (user.id, user)
            })
            .collect())
    }

    /// Everyone who can operate a counter: clerks, plus admins that have
    /// a counter assigned. This is the population the monitoring view
    /// derives live clerk state for.
    pub async fn get_attending_users(&self) -> Result<Vec<User>, Error> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE role = $1 OR (role = $2 AND counter_id IS NOT NULL) \
             ORDER BY name ASC"
        );
        Ok(self
            .0
            .query(sql.as_str(), &[&Role::Clerk, &Role::Admin])
            .await?
            .iter()
            .map(User::from_row)
            .collect())
    }

    pub async fn update_user_availability(
        &self,
        id: Id,
        availability: Availability,
        message: Option<&str>,
    ) -> Result<(), Error> {
        const SQL: &str = "\
            UPDATE users \
            SET availability = $2, availability_message = $3 \
            WHERE id = $1";

        self.0
            .execute(SQL, &[&id, &availability, &message])
            .await
            .map(drop)
    }
}
