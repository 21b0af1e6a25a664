use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{
    repo::{CredentialStore, StoreError},
    repo_types::{NewUser, User},
};

/// In-process store keyed by email, picked with `DATABASE_URL=memory:`.
/// Data lives as long as the value.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn insert(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.email) {
            return Err(StoreError::Duplicate);
        }
        let created = User {
            id: Uuid::new_v4(),
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.as_str().to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(created.email.clone(), created.clone());
        Ok(created)
    }
}
