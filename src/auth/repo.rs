use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::auth::repo_types::{NewUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a user with this email already exists")]
    Duplicate,
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Persistence for user records. Implementations must be safe to share
/// between concurrent requests and must enforce email uniqueness themselves.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when the email is taken.
    async fn insert(&self, user: &NewUser) -> Result<User, StoreError>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: &NewUser) -> Result<User, StoreError> {
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash, created_at
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.password_hash.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(insert_error)?;
        Ok(created)
    }
}

/// A unique-key violation on insert means the email was taken concurrently.
fn insert_error(err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Duplicate
    } else {
        StoreError::Backend(err)
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
