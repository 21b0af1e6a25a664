use std::sync::Arc;

use async_trait::async_trait;
use argon2::{
    password_hash::{self, PasswordHash, SaltString},
    Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::error;

use crate::config::HasherConfig;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
    #[error("argon2 hashing failed: {0}")]
    Hash(String),
    #[error("stored password hash is malformed: {0}")]
    Malformed(String),
    #[error("hashing worker failed: {0}")]
    Worker(String),
}

/// An Argon2 PHC string. Only [`PasswordHasher`] produces one, so a value of
/// this type never holds a plaintext secret.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPassword(String);

impl HashedPassword {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl std::fmt::Debug for HashedPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HashedPassword(..)")
    }
}

/// Salted Argon2id hashing with a configurable cost.
///
/// New hashes use the configured parameters. Verification reads the
/// parameters embedded in the stored hash, so older hashes keep working after
/// the cost is raised.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    dummy: Arc<str>,
}

impl PasswordHasher {
    pub fn new(config: &HasherConfig) -> Result<Self, HashError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| HashError::Params(e.to_string()))?;

        let mut hasher = Self {
            params,
            dummy: Arc::from(""),
        };
        // Verified against on the unknown-email path so both login failures cost the same.
        let dummy = hasher.hash("pathfinder-timing-equalizer")?;
        hasher.dummy = Arc::from(dummy.into_string());
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plain: &str) -> Result<HashedPassword, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashError::Hash(e.to_string())
            })?
            .to_string();
        Ok(HashedPassword(hash))
    }

    /// `Ok(false)` on mismatch; `Err` only when `stored` cannot be parsed or
    /// names parameters argon2 refuses.
    pub fn verify(&self, plain: &str, stored: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(stored).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            HashError::Malformed(e.to_string())
        })?;
        match self.argon2().verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => {
                error!(error = %e, "argon2 verify_password error");
                Err(HashError::Malformed(e.to_string()))
            }
        }
    }

    pub async fn hash_blocking(&self, plain: String) -> Result<HashedPassword, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| HashError::Worker(e.to_string()))?
    }

    pub async fn verify_blocking(&self, plain: String, stored: String) -> Result<bool, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &stored))
            .await
            .map_err(|e| HashError::Worker(e.to_string()))?
    }

    /// Burns one verification against the built-in dummy hash.
    pub async fn verify_dummy_blocking(&self, plain: String) {
        let dummy = self.dummy.to_string();
        let _ = self.verify_blocking(plain, dummy).await;
    }
}

/// Hashing as the auth service sees it. All methods may run CPU-heavy work
/// and are expected to keep it off the async workers.
#[async_trait]
pub trait SecretHasher: Send + Sync {
    async fn hash(&self, plain: String) -> Result<HashedPassword, HashError>;
    async fn verify(&self, plain: String, stored: String) -> Result<bool, HashError>;
    /// Costs one verification and reveals nothing.
    async fn verify_dummy(&self, plain: String);
}

#[async_trait]
impl SecretHasher for PasswordHasher {
    async fn hash(&self, plain: String) -> Result<HashedPassword, HashError> {
        self.hash_blocking(plain).await
    }

    async fn verify(&self, plain: String, stored: String) -> Result<bool, HashError> {
        self.verify_blocking(plain, stored).await
    }

    async fn verify_dummy(&self, plain: String) {
        self.verify_dummy_blocking(plain).await
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> PasswordHasher {
    PasswordHasher::new(&HasherConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
    .expect("test params are valid")
}
