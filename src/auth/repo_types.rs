use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::password::HashedPassword;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,                     // assigned by the store
    pub name: String,
    pub email: String,                // normalized, unique
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 PHC string, not exposed in JSON
    pub created_at: OffsetDateTime,
}

/// A user about to be persisted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: HashedPassword,
}
