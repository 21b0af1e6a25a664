use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::PgPool;

use crate::auth::{
    memory::MemoryCredentialStore, password::PasswordHasher, repo::CredentialStore,
    repo::PgCredentialStore, services::AuthService, validation::PasswordPolicy,
};
use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Picks the store from `database_url`: `memory:` keeps users in process
    /// (lost on restart), anything else is a Postgres URL.
    pub async fn connect(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        if config.uses_memory_store() {
            tracing::warn!("using in-memory credential store; users are lost on restart");
            return Self::with_store(config, Arc::new(MemoryCredentialStore::new()));
        }
        let pool = db::connect(&config).await?;
        db::migrate(&pool).await?;
        Self::init(config, pool)
    }

    /// Wires the Postgres-backed store, the hasher and the auth service.
    pub fn init(config: Arc<AppConfig>, db: PgPool) -> anyhow::Result<Self> {
        let store = Arc::new(PgCredentialStore::new(db)) as Arc<dyn CredentialStore>;
        Self::with_store(config, store)
    }

    pub fn with_store(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
    ) -> anyhow::Result<Self> {
        let hasher = PasswordHasher::new(&config.hasher).context("configure password hasher")?;
        let auth = Arc::new(AuthService::new(
            store,
            Arc::new(hasher),
            PasswordPolicy::from(config.as_ref()),
            config.store_timeout(),
        ));
        Ok(Self::from_parts(config, auth))
    }

    pub fn from_parts(config: Arc<AppConfig>, auth: Arc<AuthService>) -> Self {
        Self { config, auth }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
