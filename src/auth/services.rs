use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Context;
use tracing::{error, info, instrument, warn};

use crate::auth::{
    dto::{LoginRequest, PublicUser, SignupRequest},
    error::AuthError,
    password::SecretHasher,
    repo::{CredentialStore, StoreError},
    repo_types::NewUser,
    validation::{is_valid_email, normalize_email, validate_name, PasswordPolicy},
};

/// Signup and login over an injected store and hasher.
///
/// Holds no user data between calls: every login fetches and verifies again.
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn SecretHasher>,
    policy: PasswordPolicy,
    store_timeout: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn SecretHasher>,
        policy: PasswordPolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            hasher,
            policy,
            store_timeout,
        }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }

    #[instrument(skip(self, req), fields(email))]
    pub async fn signup(&self, req: SignupRequest) -> Result<PublicUser, AuthError> {
        let SignupRequest {
            name,
            email,
            password,
        } = req;
        let email = normalize_email(&email);
        tracing::Span::current().record("email", email.as_str());

        let name = validate_name(&name).map_err(|msg| {
            warn!("invalid name");
            AuthError::validation(msg)
        })?;
        if !is_valid_email(&email) {
            warn!("invalid email");
            return Err(AuthError::validation("Invalid email"));
        }
        self.policy.check(&password).map_err(|msg| {
            warn!(reason = msg, "password rejected by policy");
            AuthError::validation(msg)
        })?;

        match self.bounded(self.store.find_by_email(&email)).await {
            Ok(Some(_)) => {
                warn!("email already registered");
                return Err(AuthError::DuplicateUser);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "find_by_email failed");
                return Err(AuthError::internal(e));
            }
        }

        let password_hash = self.hasher.hash(password).await.map_err(|e| {
            error!(error = %e, "hash_password failed");
            AuthError::internal(e)
        })?;

        let new_user = NewUser {
            name,
            email,
            password_hash,
        };
        let user = match self.bounded(self.store.insert(&new_user)).await {
            Ok(user) => user,
            Err(StoreError::Duplicate) => {
                warn!("email registered concurrently");
                return Err(AuthError::DuplicateUser);
            }
            Err(e) => {
                error!(error = %e, "create user failed");
                return Err(AuthError::internal(
                    anyhow::Error::new(e).context("insert user"),
                ));
            }
        };

        info!(user_id = %user.id, "user registered");
        Ok(user.into())
    }

    #[instrument(skip(self, req), fields(email))]
    pub async fn login(&self, req: LoginRequest) -> Result<PublicUser, AuthError> {
        let LoginRequest { email, password } = req;
        let email = normalize_email(&email);
        tracing::Span::current().record("email", email.as_str());

        if email.is_empty() || password.is_empty() {
            warn!("missing email or password");
            return Err(AuthError::validation("Email and password are required"));
        }

        let found = self
            .bounded(self.store.find_by_email(&email))
            .await
            .context("lookup user by email")
            .map_err(|e| {
                error!(error = %format!("{e:#}"), "find_by_email failed");
                AuthError::internal(e)
            })?;

        let Some(user) = found else {
            self.hasher.verify_dummy(password).await;
            warn!("login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let ok = self
            .hasher
            .verify(password, user.password_hash.clone())
            .await
            .map_err(|e| {
                error!(error = %e, user_id = %user.id, "verify_password failed");
                AuthError::internal(e)
            })?;

        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        memory::MemoryCredentialStore,
        password::{test_hasher, HashError, HashedPassword},
        repo_types::User,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service_with(store: Arc<dyn CredentialStore>) -> AuthService {
        AuthService::new(
            store,
            Arc::new(test_hasher()),
            PasswordPolicy::default(),
            Duration::from_secs(2),
        )
    }

    fn ana_signup() -> SignupRequest {
        SignupRequest {
            name: "Ana".into(),
            email: "ana@x.com".into(),
            password: "secret123".into(),
        }
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Counts inserts and otherwise delegates to an in-memory store.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryCredentialStore,
        finds: AtomicUsize,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_email(email).await
        }
        async fn insert(&self, user: &NewUser) -> Result<User, StoreError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.inner.insert(user).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CredentialStore for FailingStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            Err(StoreError::Backend(sqlx::Error::PoolClosed))
        }
        async fn insert(&self, _user: &NewUser) -> Result<User, StoreError> {
            Err(StoreError::Backend(sqlx::Error::PoolClosed))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl CredentialStore for SlowStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
        async fn insert(&self, _user: &NewUser) -> Result<User, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(StoreError::Duplicate)
        }
    }

    /// Misses on lookup but loses the insert, as when another signup commits in between.
    struct RacyStore;

    #[async_trait]
    impl CredentialStore for RacyStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn insert(&self, _user: &NewUser) -> Result<User, StoreError> {
            Err(StoreError::Duplicate)
        }
    }

    /// Hasher whose backend is gone.
    struct BrokenHasher;

    #[async_trait]
    impl SecretHasher for BrokenHasher {
        async fn hash(&self, _plain: String) -> Result<HashedPassword, HashError> {
            Err(HashError::Hash("entropy source unavailable".into()))
        }
        async fn verify(&self, _plain: String, _stored: String) -> Result<bool, HashError> {
            Err(HashError::Worker("worker panicked".into()))
        }
        async fn verify_dummy(&self, _plain: String) {}
    }

    #[tokio::test]
    async fn hashing_failure_is_internal_and_writes_nothing() {
        let store = Arc::new(CountingStore::default());
        let service = AuthService::new(
            store.clone(),
            Arc::new(BrokenHasher),
            PasswordPolicy::default(),
            Duration::from_secs(2),
        );

        let err = service.signup(ana_signup()).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(err.to_string(), "internal error");
        assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn verify_failure_on_login_is_internal() {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .insert(&NewUser {
                name: "Ana".into(),
                email: "ana@x.com".into(),
                password_hash: test_hasher().hash("secret123").unwrap(),
            })
            .await
            .unwrap();
        let service = AuthService::new(
            store,
            Arc::new(BrokenHasher),
            PasswordPolicy::default(),
            Duration::from_secs(2),
        );

        let err = service.login(login("ana@x.com", "secret123")).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[tokio::test]
    async fn signup_then_login_returns_same_user() {
        let service = service_with(Arc::new(MemoryCredentialStore::new()));

        let created = service.signup(ana_signup()).await.expect("signup succeeds");
        assert_eq!(created.name, "Ana");
        assert_eq!(created.email, "ana@x.com");
        assert!(!created.id.is_nil());

        let logged_in = service
            .login(login("ana@x.com", "secret123"))
            .await
            .expect("login succeeds");
        assert_eq!(logged_in, created);
    }

    #[tokio::test]
    async fn signup_stores_hash_not_plaintext() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store.clone());
        service.signup(ana_signup()).await.unwrap();

        let stored = store.find_by_email("ana@x.com").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "secret123");
        assert!(stored.password_hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn email_is_normalized_on_both_paths() {
        let service = service_with(Arc::new(MemoryCredentialStore::new()));
        let created = service
            .signup(SignupRequest {
                email: "  Ana@X.com ".into(),
                ..ana_signup()
            })
            .await
            .unwrap();
        assert_eq!(created.email, "ana@x.com");
        assert!(service.login(login("ANA@x.COM", "secret123")).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_fail_identically() {
        let service = service_with(Arc::new(MemoryCredentialStore::new()));
        service.signup(ana_signup()).await.unwrap();

        let wrong = service.login(login("ana@x.com", "wrong")).await.unwrap_err();
        let unknown = service
            .login(login("bob@x.com", "secret123"))
            .await
            .unwrap_err();

        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert_eq!(wrong.status(), unknown.status());
    }

    #[tokio::test]
    async fn duplicate_signup_leaves_store_unchanged() {
        let store = Arc::new(CountingStore::default());
        let service = service_with(store.clone());
        service.signup(ana_signup()).await.unwrap();

        let err = service
            .signup(SignupRequest {
                name: "Other Ana".into(),
                ..ana_signup()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::DuplicateUser));
        assert_eq!(store.inner.len().await, 1);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_signup_never_touches_store() {
        let store = Arc::new(CountingStore::default());
        let service = service_with(store.clone());

        let cases = [
            SignupRequest {
                email: String::new(),
                ..ana_signup()
            },
            SignupRequest {
                email: "not-an-email".into(),
                ..ana_signup()
            },
            SignupRequest {
                password: String::new(),
                ..ana_signup()
            },
            SignupRequest {
                password: "short".into(),
                ..ana_signup()
            },
            SignupRequest {
                name: "  ".into(),
                ..ana_signup()
            },
        ];
        for req in cases {
            let err = service.signup(req).await.unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)), "got {err:?}");
        }
        assert_eq!(store.finds.load(Ordering::SeqCst), 0);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn login_requires_email_and_password() {
        let store = Arc::new(CountingStore::default());
        let service = service_with(store.clone());

        for req in [login("", "secret123"), login("ana@x.com", ""), login("   ", "x")] {
            let err = service.login(req).await.unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)));
        }
        assert_eq!(store.finds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn login_does_not_apply_signup_length_policy() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store.clone());
        service.signup(ana_signup()).await.unwrap();

        let err = service.login(login("ana@x.com", "short")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn store_failure_is_internal() {
        let service = service_with(Arc::new(FailingStore));
        assert!(matches!(
            service.signup(ana_signup()).await.unwrap_err(),
            AuthError::Internal(_)
        ));
        assert!(matches!(
            service.login(login("ana@x.com", "secret123")).await.unwrap_err(),
            AuthError::Internal(_)
        ));
    }

    #[tokio::test]
    async fn slow_store_times_out_as_internal() {
        let service = AuthService::new(
            Arc::new(SlowStore),
            Arc::new(test_hasher()),
            PasswordPolicy::default(),
            Duration::from_millis(20),
        );
        let err = service.login(login("ana@x.com", "secret123")).await.unwrap_err();
        match err {
            AuthError::Internal(inner) => assert!(format!("{inner:#}").contains("within")),
            other => panic!("expected internal error, got {other:?}"),
        }
        assert!(matches!(
            service.signup(ana_signup()).await.unwrap_err(),
            AuthError::Internal(_)
        ));
    }

    #[tokio::test]
    async fn insert_race_maps_to_duplicate() {
        let service = service_with(Arc::new(RacyStore));
        let err = service.signup(ana_signup()).await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUser));
    }

    #[tokio::test]
    async fn concurrent_signups_with_same_email_admit_one() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = Arc::new(service_with(store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.signup(ana_signup()).await })
            })
            .collect();

        let mut created = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(AuthError::DuplicateUser) => duplicates += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn corrupt_stored_hash_is_internal_not_invalid_credentials() {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .insert(&NewUser {
                name: "Ana".into(),
                email: "ana@x.com".into(),
                password_hash: HashedPassword::from_raw("garbage"),
            })
            .await
            .unwrap();
        let service = service_with(store);

        let err = service.login(login("ana@x.com", "secret123")).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }
}
