use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::password::HashedPassword;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,    // Argon2 PHC string
    pub is_verified: bool,
    pub otp_code: Option<String>,
    pub otp_expiry: Option<OffsetDateTime>,
    pub refresh_token: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Fields required to insert a user; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: HashedPassword,
    pub otp_code: String,
    pub otp_expiry: OffsetDateTime,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            is_verified: u.is_verified,
            created_at: u.created_at,
        }
    }
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self::from(&u)
    }
}
