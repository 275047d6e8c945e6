use serde::{Deserialize, Serialize};

use crate::db;

pub use crate::db::user::{Availability, Id, PasswordHash, Role};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub name: String,
    pub role: Role,
    pub counter_id: Option<db::counter::Id>,
    pub availability: Availability,
    pub availability_message: Option<String>,
}

impl From<db::User> for User {
    fn from(user: db::User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            role: user.role,
            counter_id: user.counter,
            availability: user.availability,
            availability_message: user.availability_message,
        }
    }
}
